//! Object walker
//!
//! Depth-first traversal of an object graph driven by the registry:
//! - Leaf classes (with a codec) are visited but not descended into
//! - Field classes recurse into each field in schema order; base classes
//!   are ordinary fields flagged `BASE_CLASS`
//! - Pointer fields resolve the concrete class of their object at runtime;
//!   a null pointer is an empty subtree
//! - Container classes delegate element iteration to their adapter
//!
//! `begin` decides whether to descend into a node, `end` decides whether to
//! continue with the node's siblings.

use void_core::ClassId;

use crate::class::Reflected;
use crate::error_handler::{ErrorHandler, StackFrame};
use crate::registry::TypeRegistry;
use crate::schema::{ClassSchema, FieldDescriptor};

/// Access intent of an enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AccessFlags(u8);

impl AccessFlags {
    pub const READ: AccessFlags = AccessFlags(0);
    pub const WRITE: AccessFlags = AccessFlags(1 << 0);
    /// The caller keeps using the root after enumeration; its end hook is
    /// deferred until [`ObjectWalker::release`]
    pub const HOLD: AccessFlags = AccessFlags(1 << 1);

    #[inline]
    pub const fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 | rhs.0)
    }
}

/// Read-only begin callback
pub type BeginFn<'a, 'r, 'c> =
    dyn FnMut(&'a dyn Reflected, &'r ClassSchema, Option<&'r FieldDescriptor>) -> bool + 'c;

/// Mutating begin callback
pub type BeginMutFn<'r, 'c> =
    dyn FnMut(&mut dyn Reflected, &'r ClassSchema, Option<&'r FieldDescriptor>) -> bool + 'c;

/// End callback
pub type EndFn<'c> = dyn FnMut() -> bool + 'c;

/// Registry-driven depth-first walker
pub struct ObjectWalker<'r> {
    registry: &'r TypeRegistry,
    flags: AccessFlags,
}

impl<'r> ObjectWalker<'r> {
    pub fn new(registry: &'r TypeRegistry, flags: AccessFlags) -> Self {
        Self { registry, flags }
    }

    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    /// Walk `object`, expected to be of class `class_id` (or derived from it)
    ///
    /// Returns the last `end` result, i.e. whether a parent walk should go on.
    pub fn enumerate<'a>(
        &self,
        object: &'a dyn Reflected,
        class_id: ClassId,
        begin: &mut BeginFn<'a, 'r, '_>,
        end: &mut EndFn<'_>,
        errors: &mut ErrorHandler,
    ) -> bool {
        self.visit(object, class_id, None, true, begin, end, errors)
    }

    /// Walk `object` with mutable access to every node
    pub fn enumerate_mut(
        &self,
        object: &mut dyn Reflected,
        class_id: ClassId,
        begin: &mut BeginMutFn<'r, '_>,
        end: &mut EndFn<'_>,
        errors: &mut ErrorHandler,
    ) -> bool {
        if !self.flags.contains(AccessFlags::WRITE) {
            errors.report_warning("mutable enumeration without WRITE access");
        }
        self.visit_mut(object, class_id, None, true, begin, end, errors)
    }

    /// Fire the deferred read end hook of a held root
    pub fn release(&self, object: &dyn Reflected) {
        if let Some(handler) = self
            .registry
            .find_class(object.class_id())
            .and_then(ClassSchema::event_handler)
        {
            handler.on_read_end(object);
        }
    }

    /// Fire the deferred write end hook of a held root
    pub fn release_mut(&self, object: &mut dyn Reflected) {
        if let Some(handler) = self
            .registry
            .find_class(object.class_id())
            .and_then(ClassSchema::event_handler)
        {
            handler.on_write_end(object);
        }
    }

    fn resolve(
        &self,
        actual: ClassId,
        declared: ClassId,
        errors: &mut ErrorHandler,
    ) -> Option<&'r ClassSchema> {
        let Some(schema) = self.registry.find_class(actual) else {
            errors.report_error(format!("class {} is not registered", actual));
            return None;
        };
        if !self.registry.is_type_of(actual, declared) {
            errors.report_error(format!(
                "class {} ({}) is not a {}",
                schema.name(),
                actual,
                declared
            ));
            return None;
        }
        Some(schema)
    }

    fn frame(schema: &ClassSchema, field: Option<&FieldDescriptor>) -> StackFrame {
        StackFrame {
            class_name: schema.name().to_string(),
            class_id: schema.id(),
            field: field.map(|f| f.name().to_string()),
            offset: field.map_or(0, FieldDescriptor::offset),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit<'a>(
        &self,
        object: &'a dyn Reflected,
        declared: ClassId,
        field: Option<&'r FieldDescriptor>,
        is_root: bool,
        begin: &mut BeginFn<'a, 'r, '_>,
        end: &mut EndFn<'_>,
        errors: &mut ErrorHandler,
    ) -> bool {
        let Some(schema) = self.resolve(object.class_id(), declared, errors) else {
            // Unknown or mismatched nodes are skipped, siblings continue
            return true;
        };

        errors.push(Self::frame(schema, field));
        let handler = schema.event_handler();
        if let Some(handler) = handler {
            handler.on_read_begin(object);
        }

        if begin(object, schema, field) && !schema.is_leaf() {
            if let Some(container) = schema.container() {
                let element_class = container.element_class();
                for index in 0..container.size(object) {
                    let Some(element) = container.element(object, index) else {
                        continue;
                    };
                    if !self.visit(element, element_class, None, false, begin, end, errors) {
                        break;
                    }
                }
            } else {
                for child_field in schema.fields() {
                    // Null pointers have no subtree
                    let Some(child) = child_field.get(object) else {
                        continue;
                    };
                    if !self.visit(
                        child,
                        child_field.class_id(),
                        Some(child_field),
                        false,
                        begin,
                        end,
                        errors,
                    ) {
                        break;
                    }
                }
            }
        }

        if let Some(handler) = handler {
            if !(is_root && self.flags.contains(AccessFlags::HOLD)) {
                handler.on_read_end(object);
            }
        }
        let keep_going = end();
        errors.pop();
        keep_going
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_mut(
        &self,
        object: &mut dyn Reflected,
        declared: ClassId,
        field: Option<&'r FieldDescriptor>,
        is_root: bool,
        begin: &mut BeginMutFn<'r, '_>,
        end: &mut EndFn<'_>,
        errors: &mut ErrorHandler,
    ) -> bool {
        let Some(schema) = self.resolve(object.class_id(), declared, errors) else {
            return true;
        };

        errors.push(Self::frame(schema, field));
        let handler = schema.event_handler();
        if let Some(handler) = handler {
            handler.on_write_begin(object);
        }

        if begin(object, schema, field) && !schema.is_leaf() {
            if let Some(container) = schema.container() {
                let element_class = container.element_class();
                for index in 0..container.size(object) {
                    let Some(element) = container.element_mut(object, index) else {
                        continue;
                    };
                    if !self.visit_mut(element, element_class, None, false, begin, end, errors) {
                        break;
                    }
                }
            } else {
                for child_field in schema.fields() {
                    let Some(child) = child_field.get_mut(object) else {
                        continue;
                    };
                    if !self.visit_mut(
                        child,
                        child_field.class_id(),
                        Some(child_field),
                        false,
                        begin,
                        end,
                        errors,
                    ) {
                        break;
                    }
                }
            }
        }

        if let Some(handler) = handler {
            if !(is_root && self.flags.contains(AccessFlags::HOLD)) {
                handler.on_write_end(object);
            }
        }
        let keep_going = end();
        errors.pop();
        keep_going
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Class, ANY_CLASS_ID};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Node {
        value: i32,
        label: String,
        children: Vec<Box<dyn Reflected>>,
        extra: Option<Box<dyn Reflected>>,
    }
    crate::impl_class!(Node, "WalkerTestNode");

    #[derive(Default)]
    struct Counter {
        reads: AtomicUsize,
        read_ends: AtomicUsize,
    }

    struct CountingHandler(Arc<Counter>);

    impl crate::EventHandler for CountingHandler {
        fn on_read_begin(&self, _object: &dyn Reflected) {
            self.0.reads.fetch_add(1, Ordering::SeqCst);
        }

        fn on_read_end(&self, _object: &dyn Reflected) {
            self.0.read_ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry(counter: Arc<Counter>) -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register_class(
            ClassSchema::builder::<Node>()
                .field("value", |n| &n.value, |n| &mut n.value)
                .field("label", |n| &n.label, |n| &mut n.label)
                .field("children", |n| &n.children, |n| &mut n.children)
                .pointer_field("extra", ANY_CLASS_ID, |n| &n.extra, |n| &mut n.extra)
                .event_handler(CountingHandler(counter))
                .build(),
        );
        registry
    }

    fn sample() -> Node {
        Node {
            value: 1,
            label: "root".into(),
            children: vec![
                Box::new(Node {
                    value: 2,
                    ..Default::default()
                }),
                Box::new(7u64),
            ],
            extra: None,
        }
    }

    #[test]
    fn test_depth_first_order() {
        let registry = registry(Arc::default());
        let walker = ObjectWalker::new(&registry, AccessFlags::READ);
        let root = sample();
        let mut visited = Vec::new();
        let mut errors = ErrorHandler::new();

        walker.enumerate(
            &root,
            Node::CLASS_ID,
            &mut |_, schema, field| {
                visited.push(format!(
                    "{}:{}",
                    schema.name(),
                    field.map_or("-", |f| f.name())
                ));
                true
            },
            &mut || true,
            &mut errors,
        );

        assert_eq!(
            visited,
            [
                "WalkerTestNode:-",
                "i32:value",
                "String:label",
                "Vec<Box<Reflected>>:children",
                "WalkerTestNode:-",
                "i32:value",
                "String:label",
                "Vec<Box<Reflected>>:children",
                "u64:-",
            ]
        );
        assert_eq!(errors.error_count(), 0);
    }

    #[test]
    fn test_begin_false_skips_children_and_end_false_stops_siblings() {
        let registry = registry(Arc::default());
        let walker = ObjectWalker::new(&registry, AccessFlags::READ);
        let root = sample();
        let mut errors = ErrorHandler::new();

        let mut count = 0;
        walker.enumerate(
            &root,
            Node::CLASS_ID,
            &mut |_, _, _| {
                count += 1;
                false
            },
            &mut || true,
            &mut errors,
        );
        assert_eq!(count, 1);

        let mut begins = 0;
        let mut ends = 0;
        walker.enumerate(
            &root,
            Node::CLASS_ID,
            &mut |_, _, _| {
                begins += 1;
                true
            },
            &mut || {
                ends += 1;
                false
            },
            &mut errors,
        );
        // Root, then its first field; the false end stops the siblings
        assert_eq!(begins, 2);
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_unregistered_class_is_reported_and_skipped() {
        #[derive(Default)]
        struct Unknown;
        crate::impl_class!(Unknown, "WalkerTestUnknown");

        let registry = registry(Arc::default());
        let walker = ObjectWalker::new(&registry, AccessFlags::READ);
        let mut root = sample();
        root.children.insert(0, Box::new(Unknown));
        let mut errors = ErrorHandler::new();
        let mut leaves = 0;

        walker.enumerate(
            &root,
            Node::CLASS_ID,
            &mut |_, schema, _| {
                if schema.is_leaf() {
                    leaves += 1;
                }
                true
            },
            &mut || true,
            &mut errors,
        );
        assert_eq!(errors.error_count(), 1);
        assert!(errors.errors()[0].contains("children"));
        // Siblings after the unknown element are still visited
        assert_eq!(leaves, 5);
    }

    #[test]
    fn test_mutable_pass() {
        let registry = registry(Arc::default());
        let walker = ObjectWalker::new(&registry, AccessFlags::WRITE);
        let mut root = sample();
        let mut errors = ErrorHandler::new();

        walker.enumerate_mut(
            &mut root,
            Node::CLASS_ID,
            &mut |object, _, _| {
                if let Some(value) = object.downcast_mut::<i32>() {
                    *value *= 10;
                }
                true
            },
            &mut || true,
            &mut errors,
        );
        assert_eq!(root.value, 10);
        let child = root.children[0].downcast_ref::<Node>().unwrap();
        assert_eq!(child.value, 20);
    }

    #[test]
    fn test_hold_defers_root_end_hook() {
        let counter = Arc::new(Counter::default());
        let registry = registry(counter.clone());
        let walker = ObjectWalker::new(&registry, AccessFlags::READ | AccessFlags::HOLD);
        let root = sample();
        let mut errors = ErrorHandler::new();

        walker.enumerate(&root, Node::CLASS_ID, &mut |_, _, _| true, &mut || true, &mut errors);
        assert_eq!(counter.reads.load(Ordering::SeqCst), 2);
        assert_eq!(counter.read_ends.load(Ordering::SeqCst), 1);

        walker.release(&root);
        assert_eq!(counter.read_ends.load(Ordering::SeqCst), 2);
    }
}
