//! 注册表并发测试

use machine_rules::{
    Rule, RuleAdministrator, RuleExecutionSet, RuleRuntime, RuleServiceProvider,
    RuleServiceProviderManager, SessionMode,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn constant_set(name: &str, value: i64, rules: usize) -> RuleExecutionSet {
    let rules = (0..rules)
        .map(|i| Rule::from_expressions(format!("r{i}"), "True", &value.to_string()).unwrap())
        .collect();
    RuleExecutionSet::new(name, rules).unwrap()
}

#[test]
fn test_concurrent_registration_of_distinct_names() {
    const N: usize = 100;
    let admin = RuleAdministrator::new();

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let admin = admin.clone();
            thread::spawn(move || {
                let name = format!("set-{i}");
                admin
                    .register_execution_set(&name, constant_set(&name, i as i64, 1), None)
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admin.len(), N);
    assert_eq!(admin.registrations().len(), N);

    let mut versions: Vec<u64> = admin
        .registrations()
        .iter()
        .map(|name| admin.registration_info(name).unwrap().version)
        .collect();
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), N);
}

#[test]
fn test_concurrent_provider_registration() {
    const N: usize = 100;
    let handles: Vec<_> = (0..N)
        .map(|i| {
            thread::spawn(move || {
                RuleServiceProviderManager::register(
                    &format!("concurrency-provider-{i}"),
                    RuleServiceProvider::new(),
                )
                .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let registered = RuleServiceProviderManager::list_providers()
        .into_iter()
        .filter(|uri| uri.starts_with("concurrency-provider-"))
        .count();
    assert_eq!(registered, N);

    for i in 0..N {
        assert!(RuleServiceProviderManager::deregister(&format!(
            "concurrency-provider-{i}"
        )));
    }
}

#[test]
fn test_readers_never_observe_partial_replacement() {
    let admin = RuleAdministrator::new();
    admin
        .register_execution_set("hot", constant_set("hot", 0, 5), None)
        .unwrap();
    let runtime = RuleRuntime::new(admin.clone());
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let admin = admin.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for generation in 1..=50 {
                admin
                    .register_execution_set("hot", constant_set("hot", generation, 5), None)
                    .unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let runtime = runtime.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let mut session = runtime.create_session("hot", SessionMode::Stateless).unwrap();
                    session.add_fact(json!({})).unwrap();
                    let results = session.execute().unwrap();
                    // 每个会话看到的都是某一代完整的规则集
                    assert_eq!(results.len(), 5);
                    assert!(results.windows(2).all(|w| w[0] == w[1]));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let set = admin.get_execution_set("hot").unwrap();
    assert_eq!(set.len(), 5);
    let info = admin.registration_info("hot").unwrap();
    assert_eq!(info.version, 51);
}
