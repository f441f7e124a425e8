//! End-to-end behavior of the object model: shape sharing across
//! independently built objects, copy-on-write metadata isolation, and
//! inline-cache behavior over real objects.

use lyra_core::intern;
use lyra_runtime::{
    Lookup, LookupStateKind, ObjectRef, PropertyFlags, ShapeRegistry, SlotData, Value,
};
use std::sync::Arc;

#[test]
fn test_end_to_end_shared_shape_monomorphic_site() {
    let registry = ShapeRegistry::new();

    // S0 --"x"--> S1 --"y"--> S2
    let s0 = registry.empty_shape();
    let s1 = registry.add_property(&s0, intern("x"), PropertyFlags::default());
    let s2 = registry.add_property(&s1, intern("y"), PropertyFlags::default());
    assert_eq!(s2.size(), 2);

    // Two objects built through the same history land on the same shape
    // instance.
    let o = ObjectRef::new(&registry);
    o.put(&registry, &intern("x"), Value::Int(1));
    o.put(&registry, &intern("y"), Value::Int(2));

    let o2 = ObjectRef::new(&registry);
    o2.put(&registry, &intern("x"), Value::Int(3));
    o2.put(&registry, &intern("y"), Value::Int(4));

    assert!(Arc::ptr_eq(&o.shape(), &o2.shape()));
    assert!(Arc::ptr_eq(&o.shape(), &s2));

    // 1000 reads of o.x through one site stay monomorphic.
    let mut site = Lookup::new(intern("x"));
    for _ in 0..1000 {
        assert_eq!(site.get(&o), Some(Value::Int(1)));
        assert_eq!(site.state_kind(), LookupStateKind::Direct);
    }
    assert_eq!(site.misses(), 1);
    assert_eq!(site.hits(), 999);

    // o2 shares the shape, so the same site stays monomorphic and reads
    // o2's own storage.
    assert_eq!(site.get(&o2), Some(Value::Int(3)));
    assert_eq!(site.state_kind(), LookupStateKind::Direct);
    assert_eq!(site.hits(), 1000);
}

#[test]
fn test_cache_degradation_stays_correct() {
    let registry = ShapeRegistry::new();

    let build = |keys: &[&str], base: i64| {
        let obj = ObjectRef::new(&registry);
        for (i, key) in keys.iter().enumerate() {
            obj.put(&registry, &intern(key), Value::Int(base + i as i64));
        }
        obj
    };
    let a = build(&["v"], 10);
    let b = build(&["pad", "v"], 20);
    let c = build(&["p", "q", "v"], 30);

    let mut site = Lookup::new(intern("v"));
    assert_eq!(site.get(&a), Some(Value::Int(10)));
    assert_eq!(site.get(&b), Some(Value::Int(21)));
    assert_eq!(site.state_kind(), LookupStateKind::DirectTwo);
    assert_eq!(site.get(&c), Some(Value::Int(32)));
    assert_eq!(site.state_kind(), LookupStateKind::Generic);

    // Generic is permanent and always correct.
    for _ in 0..3 {
        assert_eq!(site.get(&a), Some(Value::Int(10)));
        assert_eq!(site.get(&b), Some(Value::Int(21)));
        assert_eq!(site.get(&c), Some(Value::Int(32)));
    }
    assert_eq!(site.state_kind(), LookupStateKind::Generic);
}

#[test]
fn test_cow_metadata_isolation() {
    let hooks = lyra_gc::GcHooks::new();
    let mut owner_a: SlotData<Value> = SlotData::new();
    owner_a.push(Value::Int(1), &hooks);
    owner_a.push(Value::Int(2), &hooks);

    let mut owner_b = owner_a.clone();
    assert_eq!(owner_a.refcount(), 2);

    owner_b.set(1, Value::Int(99), &hooks);

    // One detach: the writer got a private buffer, the other owner's
    // view is untouched.
    assert_eq!(*owner_a.at(1), Value::Int(2));
    assert_eq!(*owner_b.at(1), Value::Int(99));
    assert_eq!(owner_a.refcount(), 1);
    assert_eq!(owner_b.refcount(), 1);
}

#[test]
fn test_removal_never_reconverges() {
    let registry = ShapeRegistry::new();
    let obj = ObjectRef::new(&registry);
    obj.put(&registry, &intern("x"), Value::Int(1));
    obj.put(&registry, &intern("y"), Value::Int(2));
    let original = obj.shape();

    assert!(obj.remove_property(&registry, &intern("y")));
    obj.put(&registry, &intern("y"), Value::Int(3));

    // Same property set, different shape identity.
    assert!(!Arc::ptr_eq(&original, &obj.shape()));
    assert_eq!(obj.get(&intern("x")), Some(Value::Int(1)));
    assert_eq!(obj.get(&intern("y")), Some(Value::Int(3)));

    // An untouched sibling built through the original history still
    // resolves against the original shape.
    let sibling = ObjectRef::new(&registry);
    sibling.put(&registry, &intern("x"), Value::Int(4));
    sibling.put(&registry, &intern("y"), Value::Int(5));
    assert!(Arc::ptr_eq(&original, &sibling.shape()));
}

#[test]
fn test_proto_chain_with_caches_and_mutation() {
    let registry = ShapeRegistry::new();
    let proto = ObjectRef::new(&registry);
    proto.put(&registry, &intern("answer"), Value::Int(42));

    // Prototype replacement is a dedicated unmemoized path, so a second
    // receiver shares the shape only by being allocated with it.
    let obj = ObjectRef::new(&registry);
    obj.set_prototype(&registry, Some(proto.clone()));
    let obj2 = ObjectRef::with_shape(obj.shape());

    let mut site = Lookup::new(intern("answer"));
    assert_eq!(site.get(&obj), Some(Value::Int(42)));
    assert_eq!(site.state_kind(), LookupStateKind::Proto);
    assert_eq!(site.get(&obj2), Some(Value::Int(42)));
    assert_eq!(site.hits(), 1);

    // An in-place write on the prototype keeps every identity the cache
    // checks, so the fast path serves the new value.
    proto.put(&registry, &intern("answer"), Value::Int(43));
    assert_eq!(site.get(&obj), Some(Value::Int(43)));
    assert_eq!(site.hits(), 2);

    // Shadowing moves the receiver to a new shape; the site revalidates
    // and the other receiver still reads through the chain.
    obj.put(&registry, &intern("answer"), Value::Int(7));
    assert_eq!(site.get(&obj), Some(Value::Int(7)));
    assert_eq!(site.get(&obj2), Some(Value::Int(43)));
}
