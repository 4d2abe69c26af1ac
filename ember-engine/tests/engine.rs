//! Cross-subsystem engine tests: keyspace + eviction + reclaimer + sweeper
//! working against each other the way the server wires them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ember_common::MaxmemoryPolicy;
use ember_engine::evict::{EvictionEngine, EvictionParams};
use ember_engine::keyspace::{Keyspace, TtlStatus};
use ember_engine::lazyfree::Reclaimer;
use ember_engine::value::{ListValue, SetValue, StringValue, Value};

fn string_value(text: &[u8]) -> Value {
    Value::String(StringValue::from_bytes(text))
}

#[test]
fn set_encoding_upgrade_scenario() {
    // SADD s 1 2 3 -> intset; SADD s hello -> hashtable; SCARD 4.
    let ks = Keyspace::new();
    ks.update_or_insert(
        b"s",
        || Value::Set(SetValue::new()),
        |v| {
            let set = v.as_set_mut().unwrap();
            set.add(b"1");
            set.add(b"2");
            set.add(b"3");
        },
    );
    assert_eq!(
        ks.view(b"s", |v| v.encoding_name()).unwrap(),
        "intset"
    );

    ks.update(b"s", |v| {
        v.as_set_mut().unwrap().add(b"hello");
    });
    assert_eq!(
        ks.view(b"s", |v| v.encoding_name()).unwrap(),
        "hashtable"
    );
    assert_eq!(ks.view(b"s", |v| v.as_set().unwrap().len()).unwrap(), 4);
    assert!(ks
        .view(b"s", |v| v.as_set().unwrap().contains(b"2"))
        .unwrap());
}

#[test]
fn lazy_expiry_without_active_sweep() {
    // SET k v PX 50; wait; EXISTS k -> 0 purely from the read path.
    let ks = Keyspace::new();
    ks.set(b"k", string_value(b"v"));
    ks.set_expire(b"k", Instant::now() + Duration::from_millis(50));
    assert_eq!(ks.dbsize(), 1);

    std::thread::sleep(Duration::from_millis(100));
    assert!(!ks.exists(b"k"));
    assert_eq!(ks.dbsize(), 0);
    assert_eq!(ks.ttl(b"k"), TtlStatus::Missing);
}

#[test]
fn lru_eviction_spares_recently_read_keys() {
    let ks = Keyspace::new();
    let payload = vec![b'x'; 200];
    for i in 0..1000 {
        ks.set(
            format!("key:{i:04}").as_bytes(),
            Value::String(StringValue::from_bytes(&payload)),
        );
    }

    // The LRU clock has 1 s resolution; age the whole population past one
    // tick, then refresh a working set.
    std::thread::sleep(Duration::from_millis(1100));
    for i in 0..100 {
        ks.view(format!("key:{i:04}").as_bytes(), |_| ());
    }

    let engine = EvictionEngine::new(EvictionParams {
        maxmemory: (ks.used_memory() / 2) as u64,
        policy: MaxmemoryPolicy::AllKeysLru,
        samples: 5,
        lfu_decay_minutes: 60,
        max_evictions: 2000,
    });

    let mut evicted: Vec<Vec<u8>> = Vec::new();
    while engine.needs_eviction(&ks) {
        let round = engine.evict(&ks);
        if round.is_empty() {
            break;
        }
        evicted.extend(round);
    }

    assert!(!evicted.is_empty());
    // Sampling is approximate; demand a strong skew rather than perfection:
    // the refreshed working set loses far fewer members than the idle bulk.
    let hot_evicted = evicted
        .iter()
        .filter(|k| {
            let text = String::from_utf8_lossy(k);
            text.as_ref() < "key:0100"
        })
        .count();
    assert!(
        hot_evicted * 5 < evicted.len(),
        "evicted {hot_evicted} hot keys out of {}",
        evicted.len()
    );
}

#[test]
fn deletes_route_large_values_to_reclaimer() {
    let ks = Keyspace::new();
    let reclaimer = Reclaimer::start(64);
    ks.attach_reclaimer(Arc::clone(&reclaimer));

    let mut list = ListValue::new();
    for i in 0..500 {
        list.push_tail(i.to_string().into_bytes());
    }
    ks.set(b"big", Value::List(list));
    ks.set(b"small", string_value(b"v"));

    assert!(ks.delete(b"big"));
    assert!(ks.delete(b"small"));

    let deadline = Instant::now() + Duration::from_secs(2);
    while reclaimer.completed() < 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    // Only the big list crossed the effort threshold.
    assert_eq!(reclaimer.completed(), 1);
    reclaimer.shutdown();
}

#[test]
fn dbsize_matches_shard_sums_under_churn() {
    let ks = Keyspace::new();
    for i in 0..300 {
        ks.set(format!("k{i}").as_bytes(), string_value(b"v"));
    }
    for i in 0..100 {
        ks.delete(format!("k{i}").as_bytes());
    }
    for i in 0..50 {
        ks.set_expire(
            format!("k{}", 100 + i).as_bytes(),
            Instant::now() + Duration::from_secs(100),
        );
    }
    assert_eq!(ks.dbsize(), 200);
    assert_eq!(ks.expires_size(), 50);

    ks.flush();
    assert_eq!(ks.dbsize(), 0);
    assert_eq!(ks.expires_size(), 0);
}

#[test]
fn watch_check_sees_cross_value_mutations() {
    let ks = Keyspace::new();
    ks.set(b"k", string_value(b"1"));
    let v0 = ks.key_version(b"k");

    // Reads do not invalidate the watch.
    ks.view(b"k", |_| ());
    assert!(ks.watch_check(b"k", v0));

    // Any write does.
    ks.update(b"k", |v| v.as_string_mut().unwrap().incr_by(1).unwrap());
    assert!(!ks.watch_check(b"k", v0));
}
