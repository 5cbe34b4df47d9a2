//! 规则引擎命令行
//!
//! 加载 YAML 规则文档或 CSV 决策表，在一次作用域会话中对 JSON 事实执行并输出结果。

use anyhow::{Context, Result, bail};
use clap::Parser;
use machine_rules::{
    DmnRuleLoader, ExecuteOptions, FailurePolicy, FiringPolicy, RuleExecutionSet,
    RuleServiceProviderManager, SafeEvaluator, SessionMode, SessionOptions, YamlRuleLoader,
};
use machine_rules_shared::config::AppConfig;
use machine_rules_shared::observability;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

const SERVICE_NAME: &str = "machine-rules";
const PROVIDER_URI: &str = "machine";

/// 对 JSON 事实执行 YAML 规则集
#[derive(Parser, Debug)]
#[command(name = "machine-rules", version, about)]
struct Cli {
    /// YAML 规则文档，扩展名为 .csv 时按决策表加载
    #[arg(long)]
    rules: PathBuf,

    /// 决策表条件针对的事实字段
    #[arg(long, default_value = "income")]
    input_field: String,

    /// JSON 事实文件（数组或单个对象）
    #[arg(long)]
    facts: PathBuf,

    /// 使用有状态会话
    #[arg(long)]
    stateful: bool,

    /// 每个事实只触发第一条匹配的规则
    #[arg(long)]
    first_match: bool,

    /// 记录规则失败并继续执行；输出包含 failures 的完整结果
    #[arg(long)]
    collect_failures: bool,

    /// 输出评估追踪
    #[arg(long)]
    trace: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let _guard = observability::init(SERVICE_NAME, &config.observability)?;

    let evaluator = SafeEvaluator::new(config.engine.sandbox.clone());
    let set = load_rules(&cli, evaluator)
        .with_context(|| format!("加载规则文件 {} 失败", cli.rules.display()))?;
    let set_name = set.name().to_string();
    let facts = read_facts(&cli.facts)?;

    RuleServiceProviderManager::initialize();
    let provider = RuleServiceProviderManager::get(PROVIDER_URI)?;
    provider
        .administrator()
        .register_execution_set(&set_name, set, None)?;

    let mode = if cli.stateful {
        SessionMode::Stateful
    } else {
        SessionMode::Stateless
    };
    let mut options = SessionOptions::from_config(&config.engine, mode);
    if cli.first_match {
        options = options.with_firing_policy(FiringPolicy::FirstMatch);
    }
    if cli.collect_failures {
        options = options.with_failure_policy(FailurePolicy::Collect);
    }
    let mut execute_options = ExecuteOptions::new();
    if cli.trace {
        execute_options = execute_options.with_trace();
    }

    info!(set = %set_name, facts = facts.len(), mode = %mode, "开始执行规则");
    let outcome = provider
        .runtime()
        .with_session(&set_name, options, |session| {
            session.add_facts(facts)?;
            session.execute_with(&execute_options)
        })?;

    let output = if cli.collect_failures || cli.trace {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string_pretty(&outcome.results)?
    };
    println!("{}", output);
    Ok(())
}

fn load_rules(cli: &Cli, evaluator: SafeEvaluator) -> machine_rules::Result<RuleExecutionSet> {
    let is_table = cli
        .rules
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_table {
        DmnRuleLoader::new()
            .with_evaluator(evaluator)
            .with_input_field(cli.input_field.as_str())
            .load_file(&cli.rules)
    } else {
        YamlRuleLoader::with_evaluator(evaluator).load_file(&cli.rules)
    }
}

fn read_facts(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取事实文件 {} 失败", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("解析事实文件 {} 失败", path.display()))?;
    match value {
        Value::Array(facts) => Ok(facts),
        Value::Object(_) => Ok(vec![value]),
        other => bail!("事实文件必须是 JSON 数组或对象，实际为 {}", other),
    }
}
