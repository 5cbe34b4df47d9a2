//! 规则引擎集成测试
//!
//! 覆盖注册、会话、执行的完整工作流。

use machine_rules::{
    ExecuteOptions, FailurePolicy, FiringPolicy, Rule, RuleAdministrator, RuleError,
    RuleExecutionSet, RuleRuntime, RuleServiceProvider, SessionMode, SessionOptions,
    SessionState,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

/// 两条规则：高额订单为 premium，其余为 standard
fn create_tier_set() -> RuleExecutionSet {
    RuleExecutionSet::new(
        "tiers",
        vec![
            Rule::from_expressions("standard", "True", "{'tier': 'standard'}")
                .unwrap()
                .with_priority(1),
            Rule::from_expressions("premium", "amount > 1000", "{'tier': 'premium'}")
                .unwrap()
                .with_priority(100),
        ],
    )
    .unwrap()
    .with_description("按订单金额分级")
}

fn create_runtime() -> RuleRuntime {
    let provider = RuleServiceProvider::new();
    provider
        .administrator()
        .register_execution_set("tiers", create_tier_set(), None)
        .unwrap();
    provider.runtime().clone()
}

fn tier_facts() -> Vec<Value> {
    vec![json!({"amount": 1500}), json!({"amount": 500})]
}

#[test]
fn test_tier_scenario_all_matches() {
    let runtime = create_runtime();
    let mut session = runtime
        .create_session("tiers", SessionMode::Stateless)
        .unwrap();
    session.add_facts(tier_facts()).unwrap();

    let results = session.execute().unwrap();
    assert_eq!(
        results,
        vec![
            json!({"tier": "premium"}),
            json!({"tier": "standard"}),
            json!({"tier": "standard"}),
        ]
    );
}

#[test]
fn test_tier_scenario_first_match() {
    let runtime = create_runtime();
    let options =
        SessionOptions::new(SessionMode::Stateless).with_firing_policy(FiringPolicy::FirstMatch);
    let mut session = runtime.create_session_with("tiers", options).unwrap();
    session.add_facts(tier_facts()).unwrap();

    let results = session.execute().unwrap();
    assert_eq!(
        results,
        vec![json!({"tier": "premium"}), json!({"tier": "standard"})]
    );
}

#[test]
fn test_stateless_session_clears_facts() {
    let runtime = create_runtime();
    let mut session = runtime
        .create_session("tiers", SessionMode::Stateless)
        .unwrap();

    session.add_facts(vec![json!({"value": 1})]).unwrap();
    // value 不是 amount，premium 条件会失败；失败路径也要清空事实
    assert!(session.execute().is_err());
    assert!(session.get_facts().unwrap().is_empty());

    session.add_facts(vec![json!({"amount": 1})]).unwrap();
    session.execute().unwrap();
    assert!(session.get_facts().unwrap().is_empty());
}

#[test]
fn test_stateful_session_accumulates_facts() {
    let runtime = create_runtime();
    let mut session = runtime
        .create_session("tiers", SessionMode::Stateful)
        .unwrap();

    session.add_facts(vec![json!({"amount": 1500})]).unwrap();
    assert_eq!(session.execute().unwrap().len(), 2);

    session.add_facts(vec![json!({"amount": 10})]).unwrap();
    let results = session.execute().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(session.get_facts().unwrap().len(), 2);

    session.clear_facts().unwrap();
    assert!(session.get_facts().unwrap().is_empty());
    assert!(session.execute().unwrap().is_empty());
}

#[test]
fn test_close_is_idempotent_and_final() {
    let runtime = create_runtime();
    let mut session = runtime
        .create_session("tiers", SessionMode::Stateful)
        .unwrap();
    session.add_fact(json!({"amount": 1})).unwrap();

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);

    let errors = [
        session.add_fact(json!({})).unwrap_err(),
        session.execute().unwrap_err(),
        session.get_facts().unwrap_err(),
        session.clear_facts().unwrap_err(),
    ];
    for err in errors {
        assert!(matches!(err, RuleError::Session(_)), "unexpected: {err:?}");
    }
}

/// 收集当前线程上的日志输出
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs(f: impl FnOnce()) -> String {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = logs.0.lock().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn was_closed(logs: &str, session_id: Uuid) -> bool {
    let id = format!("session_id={}", session_id);
    logs.lines()
        .any(|line| line.contains("会话已关闭") && line.contains(&id))
}

#[test]
fn test_scoped_session_closes_on_error() {
    let runtime = create_runtime();
    let mut session_id = None;
    let mut result = None;

    let logs = capture_logs(|| {
        result = Some(runtime.with_session("tiers", SessionOptions::default(), |session| {
            session_id = Some(session.id());
            session.add_fact(json!({"other": 1}))?;
            session.execute()?;
            Ok(())
        }));
    });

    match result.unwrap().unwrap_err() {
        RuleError::Execution {
            rule, fact_index, ..
        } => {
            assert_eq!(rule, "premium");
            assert_eq!(fact_index, 0);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(was_closed(&logs, session_id.unwrap()), "{logs}");
}

#[test]
fn test_scoped_session_closes_on_panic() {
    let runtime = create_runtime();
    let mut session_id = None;
    let mut outcome = None;

    let logs = capture_logs(|| {
        outcome = Some(panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.with_session(
                "tiers",
                SessionOptions::default(),
                |session| -> machine_rules::Result<()> {
                    session_id = Some(session.id());
                    session.add_fact(json!({"amount": 1}))?;
                    panic!("caller bug")
                },
            )
        })));
    });

    assert!(outcome.unwrap().is_err());
    assert!(was_closed(&logs, session_id.unwrap()), "{logs}");

    // 注册表不受影响，后续会话照常工作
    let results = runtime
        .with_session("tiers", SessionOptions::default(), |session| {
            session.add_fact(json!({"amount": 1}))?;
            session.execute()
        })
        .unwrap();
    assert_eq!(results, vec![json!({"tier": "standard"})]);
}

#[test]
fn test_scoped_session_closes_on_success() {
    let runtime = create_runtime();
    let mut session_id = None;
    let logs = capture_logs(|| {
        let count = runtime
            .with_session("tiers", SessionOptions::default(), |session| {
                session_id = Some(session.id());
                session.add_facts(tier_facts())?;
                session.execute().map(|results| results.len())
            })
            .unwrap();
        assert_eq!(count, 3);
    });
    assert!(was_closed(&logs, session_id.unwrap()), "{logs}");
}

#[test]
fn test_collect_failures_keeps_successful_results() {
    let runtime = create_runtime();
    let options =
        SessionOptions::new(SessionMode::Stateless).with_failure_policy(FailurePolicy::Collect);
    let mut session = runtime.create_session_with("tiers", options).unwrap();
    session
        .add_facts(vec![json!({"other": 1}), json!({"amount": 5000})])
        .unwrap();

    let outcome = session.execute_with(&ExecuteOptions::new()).unwrap();
    assert!(!outcome.is_success());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].rule, "premium");
    assert_eq!(outcome.failures[0].fact_index, 0);
    assert_eq!(outcome.failures[0].code, "EXECUTION_ERROR");
    assert_eq!(
        outcome.results,
        vec![
            json!({"tier": "standard"}),
            json!({"tier": "premium"}),
            json!({"tier": "standard"}),
        ]
    );
}

#[test]
fn test_filter_limits_rules() {
    let runtime = create_runtime();
    let mut session = runtime
        .create_session("tiers", SessionMode::Stateless)
        .unwrap();
    session.add_facts(tier_facts()).unwrap();

    let only_low_priority = |rule: &Rule| rule.priority() < 10;
    let results = session.execute_filtered(&only_low_priority).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["tier"] == "standard"));
}

#[test]
fn test_expression_action_computes_value() {
    let admin = RuleAdministrator::new();
    let set = RuleExecutionSet::new(
        "markup",
        vec![Rule::from_expressions("markup", "True", "fact.get('amount') * 1.1").unwrap()],
    )
    .unwrap();
    admin.register_execution_set("markup", set, None).unwrap();

    let runtime = RuleRuntime::new(admin);
    let mut session = runtime
        .create_session("markup", SessionMode::Stateless)
        .unwrap();
    session.add_fact(json!({"amount": 100})).unwrap();

    let results = session.execute().unwrap();
    let value = results[0].as_f64().unwrap();
    assert!((value - 110.0).abs() < 1e-9);
}

#[test]
fn test_native_and_expression_rules_mix() {
    let native = Rule::native(
        "vip",
        |fact: &Value| Ok(fact["vip"] == json!(true)),
        |fact: &Value| Ok(json!({"discount": 0.2, "user": fact["user"].clone()})),
    )
    .unwrap()
    .with_priority(5);
    let expression =
        Rule::from_expressions("everyone", "True", "{'discount': 0, 'user': user}").unwrap();

    let admin = RuleAdministrator::new();
    admin
        .register_execution_set(
            "discounts",
            RuleExecutionSet::new("discounts", vec![expression, native]).unwrap(),
            None,
        )
        .unwrap();
    let runtime = RuleRuntime::new(admin);

    let results = runtime
        .with_session("discounts", SessionOptions::default(), |session| {
            session.add_facts(vec![
                json!({"user": "alice", "vip": true}),
                json!({"user": "bob", "vip": false}),
            ])?;
            session.execute()
        })
        .unwrap();

    assert_eq!(
        results,
        vec![
            json!({"discount": 0.2, "user": "alice"}),
            json!({"discount": 0, "user": "alice"}),
            json!({"discount": 0, "user": "bob"}),
        ]
    );
}

#[test]
fn test_session_bindings_visible_to_expressions() {
    let runtime = create_runtime();
    let admin = runtime.administrator();
    admin
        .register_execution_set(
            "threshold",
            RuleExecutionSet::new(
                "threshold",
                vec![Rule::from_expressions("over", "amount > limit", "amount - limit").unwrap()],
            )
            .unwrap(),
            None,
        )
        .unwrap();

    let options = SessionOptions::new(SessionMode::Stateful).with_binding("limit", json!(100));
    let mut session = runtime.create_session_with("threshold", options).unwrap();
    session
        .add_facts(vec![json!({"amount": 150}), json!({"amount": 50})])
        .unwrap();
    assert_eq!(session.execute().unwrap(), vec![json!(50)]);

    session.set_binding("limit", json!(10)).unwrap();
    assert_eq!(session.execute().unwrap(), vec![json!(140), json!(40)]);
}

#[test]
fn test_invalid_set_is_never_registered() {
    let admin = RuleAdministrator::new();

    let duplicate = RuleExecutionSet::new(
        "dup",
        vec![
            Rule::from_expressions("same", "True", "1").unwrap(),
            Rule::from_expressions("same", "True", "2").unwrap(),
        ],
    );
    assert!(matches!(duplicate, Err(RuleError::Validation(_))));

    let unsafe_rule = Rule::from_expressions("evil", "__import__('os').system('ls')", "None");
    assert!(matches!(unsafe_rule, Err(RuleError::Security(_))));

    assert!(admin.is_empty());
    assert!(matches!(
        admin.get_execution_set("dup"),
        Err(RuleError::NotFound(_))
    ));
}

#[test]
fn test_reregistration_replaces_atomically() {
    let runtime = create_runtime();
    let admin = runtime.administrator();
    let before = admin.registration_info("tiers").unwrap();

    admin
        .register_execution_set(
            "tiers",
            RuleExecutionSet::new(
                "tiers",
                vec![Rule::from_expressions("flat", "True", "'flat'").unwrap()],
            )
            .unwrap(),
            None,
        )
        .unwrap();

    let after = admin.registration_info("tiers").unwrap();
    assert!(after.version > before.version);
    assert_eq!(after.rule_count, 1);
    assert_eq!(admin.len(), 1);

    let set = admin.get_execution_set("tiers").unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.rule("premium").is_none());
}

#[test]
fn test_deregistered_set_cannot_open_sessions() {
    let runtime = create_runtime();
    assert!(runtime.administrator().deregister_execution_set("tiers"));
    assert!(!runtime.administrator().deregister_execution_set("tiers"));

    let err = runtime
        .create_session("tiers", SessionMode::Stateless)
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}
