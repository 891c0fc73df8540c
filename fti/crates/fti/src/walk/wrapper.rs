//! Tag Wrappers
//!
//! A wrapper snapshots the tags a callback sees and writes back whatever the
//! callback changed. Both tags (object and class) are read under a single
//! acquisition of the table lock; the write-back takes the lock again and
//! looks the entry up by identity, so tag changes made through the
//! environment during the callback are not lost unless the callback itself
//! wrote the slot.

use super::callbacks::{ObjectInfo, TagSlots};
use crate::object::ObjectRef;
use crate::runtime::ManagedRuntime;
use crate::tagmap::TagMap;

/// Tag view of one object
#[derive(Debug)]
pub(crate) struct CallbackWrapper {
    identity: ObjectRef,
    initial_tag: i64,
    tag: i64,
    class_tag: i64,
    size: u64,
    length: i32,
}

impl CallbackWrapper {
    pub fn new(runtime: &dyn ManagedRuntime, tags: &TagMap, obj: ObjectRef) -> Self {
        let identity = runtime.tag_identity(obj);
        let class_identity = runtime.class_of(obj).as_object();
        let size = runtime.object_size(identity);
        let length = if runtime.object_kind(obj).is_array() {
            runtime.array_length(obj) as i32
        } else {
            -1
        };

        let (tag, class_tag) = {
            let table = tags.lock();
            (table.tag_of(identity), table.tag_of(class_identity))
        };

        Self {
            identity,
            initial_tag: tag,
            tag,
            class_tag,
            size,
            length,
        }
    }

    #[inline]
    pub fn info(&self) -> ObjectInfo {
        ObjectInfo {
            class_tag: self.class_tag,
            size: self.size,
            length: self.length,
        }
    }

    #[inline]
    pub fn tag(&self) -> i64 {
        self.tag
    }

    #[inline]
    pub fn tag_mut(&mut self) -> &mut i64 {
        &mut self.tag
    }

    #[inline]
    pub fn class_tag(&self) -> i64 {
        self.class_tag
    }

    /// Write a changed tag back to the table
    pub fn finish(self, tags: &TagMap) {
        if self.tag != self.initial_tag {
            tags.lock().update(self.identity, self.tag);
        }
    }
}

/// Tag view of a referrer and the object it references
#[derive(Debug)]
pub(crate) struct TwoOopCallbackWrapper {
    object: CallbackWrapper,
    /// `None` for a self reference
    referrer: Option<CallbackWrapper>,
}

impl TwoOopCallbackWrapper {
    pub fn new(
        runtime: &dyn ManagedRuntime,
        tags: &TagMap,
        referrer: ObjectRef,
        obj: ObjectRef,
    ) -> Self {
        let object = CallbackWrapper::new(runtime, tags, obj);
        let referrer = if referrer == obj {
            None
        } else {
            Some(CallbackWrapper::new(runtime, tags, referrer))
        };
        Self { object, referrer }
    }

    #[inline]
    pub fn object(&self) -> &CallbackWrapper {
        &self.object
    }

    /// Class tag of the referrer; the object's own for a self reference
    pub fn referrer_class_tag(&self) -> i64 {
        self.referrer
            .as_ref()
            .map_or(self.object.class_tag, CallbackWrapper::class_tag)
    }

    pub fn slots(&self) -> TagSlots {
        match &self.referrer {
            Some(referrer) => TagSlots::edge(self.object.tag, referrer.tag),
            None => TagSlots::self_reference(self.object.tag),
        }
    }

    /// Take the slot values the callback left behind
    pub fn apply(&mut self, slots: &TagSlots) {
        self.object.tag = slots.tag();
        if let (Some(referrer), Some(tag)) = (self.referrer.as_mut(), slots.referrer_tag()) {
            referrer.tag = tag;
        }
    }

    pub fn finish(self, tags: &TagMap) {
        self.object.finish(tags);
        if let Some(referrer) = self.referrer {
            referrer.finish(tags);
        }
    }
}
