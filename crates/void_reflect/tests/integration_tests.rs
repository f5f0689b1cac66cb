//! Integration tests for void_reflect

use std::sync::atomic::{AtomicUsize, Ordering};

use void_reflect::prelude::*;
use void_reflect::{name_hash, StreamFormat};

#[derive(Default, Debug, Clone, PartialEq)]
struct Named {
    name: String,
}
impl_class!(Named, "ItNamed");

#[derive(Default)]
struct Light {
    named: Named,
    intensity: f32,
    color: Vec<f32>,
}
impl_class!(Light, "ItLight");

#[derive(Default)]
struct Scene {
    title: String,
    lights: Vec<Box<dyn Reflected>>,
    sun: Option<Box<dyn Reflected>>,
}
impl_class!(Scene, "ItScene");

static SCENE_UPGRADES: AtomicUsize = AtomicUsize::new(0);

fn upgrade_scene(_: &TypeRegistry, node: &mut DataElementNode) -> bool {
    SCENE_UPGRADES.fetch_add(1, Ordering::SeqCst);
    match node.child_mut("caption") {
        Some(caption) => {
            caption.rename("title");
            true
        }
        None => true,
    }
}

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register_class(
            ClassSchema::builder::<Named>()
                .field("name", |n| &n.name, |n| &mut n.name)
                .build(),
        )
        .register_class(
            ClassSchema::builder::<Light>()
                .base::<Named>(|l| &l.named, |l| &mut l.named)
                .field("intensity", |l| &l.intensity, |l| &mut l.intensity)
                .field("color", |l| &l.color, |l| &mut l.color)
                .build(),
        )
        .register_class(
            ClassSchema::builder::<Scene>()
                .version(1, Some(upgrade_scene))
                .field("title", |s| &s.title, |s| &mut s.title)
                .field("lights", |s| &s.lights, |s| &mut s.lights)
                .pointer_field("sun", Light::CLASS_ID, |s| &s.sun, |s| &mut s.sun)
                .build(),
        );
    registry
}

fn light(name: &str, intensity: f32) -> Light {
    Light {
        named: Named { name: name.into() },
        intensity,
        color: vec![1.0, 0.5, 0.25],
    }
}

fn scene() -> Scene {
    Scene {
        title: "night".into(),
        lights: vec![
            Box::new(light("lamp", 2.0)) as Box<dyn Reflected>,
            Box::new(Named {
                name: "marker".into(),
            }),
        ],
        sun: Some(Box::new(light("sun", 10.0))),
    }
}

fn assert_same_light(a: &dyn Reflected, b: &Light) {
    let a = a.downcast_ref::<Light>().unwrap();
    assert_eq!(a.named, b.named);
    assert_eq!(a.intensity, b.intensity);
    assert_eq!(a.color, b.color);
}

fn assert_same_element(a: &dyn Reflected, b: &dyn Reflected) {
    match b.downcast_ref::<Light>() {
        Some(light) => assert_same_light(a, light),
        None => assert_eq!(a.downcast_ref::<Named>(), b.downcast_ref::<Named>()),
    }
}

fn assert_same_scene(a: &Scene, b: &Scene) {
    assert_eq!(a.title, b.title);
    assert_eq!(a.lights.len(), b.lights.len());
    for (x, y) in a.lights.iter().zip(&b.lights) {
        assert_same_element(&**x, &**y);
    }
    assert_same_light(
        a.sun.as_deref().unwrap(),
        b.sun.as_deref().and_then(|s| s.downcast_ref::<Light>()).unwrap(),
    );
}

#[test]
fn test_clone_is_field_wise_equal() {
    let registry = registry();
    let original = scene();
    let copy = Cloner::new(&registry).clone_typed(&original).unwrap();
    assert_same_scene(&copy, &original);
}

#[test]
fn test_base_class_capability_query() {
    let registry = registry();
    let lamp = light("lamp", 1.0);
    let named = registry
        .as_type(&lamp, Named::CLASS_ID)
        .and_then(|n| n.downcast_ref::<Named>())
        .unwrap();
    assert_eq!(named.name, "lamp");
}

#[test]
fn test_document_round_trip_in_both_formats() {
    let registry = registry();
    let big_endian_json = ObjectStreamConfig {
        format: StreamFormat::Json,
        big_endian: true,
    };
    for config in [ObjectStreamConfig::binary(), ObjectStreamConfig::json(), big_endian_json] {
        let stream = ObjectStream::with_config(&registry, config);
        let mut errors = ErrorHandler::new();
        let bytes = stream.save(&scene(), &mut errors).unwrap();
        let loaded: Scene = stream.load_typed(&bytes, &mut errors).unwrap();
        assert_same_scene(&loaded, &scene());
        assert_eq!(errors.error_count(), 0, "format {:?}", config.format);
    }
}

#[test]
fn test_old_document_is_upgraded_once() {
    let registry = registry();
    let stream = ObjectStream::new(&registry);
    let mut errors = ErrorHandler::new();

    let mut root = stream.to_node(&scene(), &mut errors).unwrap();
    root.version = 0;
    root.child_mut("title").unwrap().rename("caption");

    let before = SCENE_UPGRADES.load(Ordering::SeqCst);
    let loaded = stream.load_node(&root, Scene::CLASS_ID, &mut errors).unwrap();
    assert_eq!(SCENE_UPGRADES.load(Ordering::SeqCst) - before, 1);
    assert_eq!(loaded.downcast_ref::<Scene>().unwrap().title, "night");
    assert_eq!(errors.error_count(), 0);
}

#[test]
fn test_deprecated_elements_are_dropped() {
    let stream_registry = registry();
    let stream = ObjectStream::new(&stream_registry);
    let mut errors = ErrorHandler::new();
    let root = stream.to_node(&scene(), &mut errors).unwrap();

    let mut registry = registry();
    registry.deprecate_class("ItNamed", Named::CLASS_ID, None);
    let stream = ObjectStream::new(&registry);
    let loaded = stream.load_node(&root, Scene::CLASS_ID, &mut errors).unwrap();
    let loaded = loaded.downcast_ref::<Scene>().unwrap();

    // The plain Named element is gone, the light survives with its base
    // class data dropped
    assert_eq!(loaded.lights.len(), 1);
    assert!(loaded.lights[0].is::<Light>());
    assert_eq!(errors.error_count(), 0);
    assert!(errors.warning_count() >= 1);
}

#[test]
fn test_patch_round_trip_and_idempotence() {
    let registry = registry();
    let none = FlagsMap::new();
    let base = scene();
    let mut edited = scene();
    edited.title = "dawn".into();
    if let Some(sun) = edited.sun.as_mut().and_then(|s| s.downcast_mut::<Light>()) {
        sun.intensity = 3.0;
    }
    edited.lights.pop();

    let source: &dyn Reflected = &base;
    let first = DataPatch::create(&registry, source, &edited, &none, &none).unwrap();
    let second = DataPatch::create(&registry, source, &edited, &none, &none).unwrap();
    assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());

    let rebuilt = first.apply(&registry, source, &none, &none).unwrap();
    let rebuilt = rebuilt.downcast_ref::<Scene>().unwrap();
    assert_same_scene(rebuilt, &edited);

    let sun_intensity = vec![
        u64::from(name_hash("sun")),
        u64::from(name_hash("intensity")),
    ];
    assert!(first.get(&sun_intensity).is_some());
}

#[test]
fn test_prevent_flag_blocks_override() {
    let registry = registry();
    let mut flags = FlagsMap::new();
    flags.insert(vec![u64::from(name_hash("title"))], DataPatchFlags::PREVENT_OVERRIDE_SET);

    let mut edited = scene();
    edited.title = "blocked".into();
    let source: &dyn Reflected = &scene();
    let patch = DataPatch::create(&registry, source, &edited, &flags, &FlagsMap::new()).unwrap();
    assert!(patch.is_empty());
}
