//! 路由规则与匹配引擎
//!
//! 条件文档沿用既有规则定义的操作符词汇（`$eq` `$ne` `$gt` `$gte`
//! `$lt` `$lte` `$in` `$nin`），匹配过程绝不报错：
//! 无法解析的路径、类型不兼容的比较、未识别的操作符一律按不匹配处理。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use router_core::{RouterError, RouterResult};

/// 记录属性袋在存储中的字段名
///
/// 条件路径允许带或不带该前缀，解析时先剥离；
/// 编译为存储过滤文档时统一补上。
pub const ATTRIBUTE_BAG: &str = "info_features";

/// 面向记录存储的原生过滤文档
pub type DocumentFilter = Map<String, Value>;

/// 单个条件的三种形态（线格式不带标签，与既有规则文档逐字兼容）
///
/// - JSON 列表 => `OneOf`，成员匹配
/// - JSON 对象 => `Operator`，对象内所有操作符须同时成立
/// - 其余标量 => `Equals`，相等匹配
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    OneOf(Vec<Value>),
    Operator(Map<String, Value>),
    Equals(Value),
}

impl Condition {
    /// 对解析出的属性值求值，`None` 表示路径未解析
    pub fn matches(&self, resolved: Option<&Value>) -> bool {
        match self {
            Condition::OneOf(allowed) => match resolved {
                Some(value) => contains_value(allowed, value),
                None => false,
            },
            Condition::Operator(ops) => {
                // 空对象没有任何可满足的操作符，按不匹配处理
                if ops.is_empty() {
                    return false;
                }
                ops.iter()
                    .all(|(op, operand)| apply_operator(op, operand, resolved))
            }
            Condition::Equals(expected) => match resolved {
                Some(value) => values_equal(value, expected),
                None => false,
            },
        }
    }
}

fn apply_operator(op: &str, operand: &Value, resolved: Option<&Value>) -> bool {
    match op {
        "$eq" => resolved.is_some_and(|v| values_equal(v, operand)),
        // 文档库语义：缺失字段与任何值都"不相等"，因此匹配 $ne
        "$ne" => !resolved.is_some_and(|v| values_equal(v, operand)),
        "$gt" => compare_values(resolved, operand)
            .is_some_and(|ord| ord == std::cmp::Ordering::Greater),
        "$gte" => {
            compare_values(resolved, operand).is_some_and(|ord| ord != std::cmp::Ordering::Less)
        }
        "$lt" => {
            compare_values(resolved, operand).is_some_and(|ord| ord == std::cmp::Ordering::Less)
        }
        "$lte" => {
            compare_values(resolved, operand).is_some_and(|ord| ord != std::cmp::Ordering::Greater)
        }
        "$in" => match (resolved, operand) {
            (Some(value), Value::Array(allowed)) => contains_value(allowed, value),
            _ => false,
        },
        "$nin" => match operand {
            Value::Array(denied) => match resolved {
                Some(value) => !contains_value(denied, value),
                // 缺失字段不在任何列表中，匹配 $nin
                None => true,
            },
            _ => false,
        },
        // 未识别的操作符一律不匹配（fail closed）
        _ => false,
    }
}

/// 跨整型/浮点的数值等值，其余类型按JSON等值
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn contains_value(list: &[Value], value: &Value) -> bool {
    list.iter().any(|candidate| values_equal(candidate, value))
}

/// 有序比较：仅数值对数值、字符串对字符串，其余组合视为不可比
fn compare_values(resolved: Option<&Value>, operand: &Value) -> Option<std::cmp::Ordering> {
    let actual = resolved?;
    match (actual, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// 将条件文档编译为记录存储的原生过滤文档
///
/// 条件键统一补上属性袋前缀；列表转为 `$in`；
/// 操作符对象与标量逐字透传。
pub fn compile_conditions(conditions: &BTreeMap<String, Condition>) -> DocumentFilter {
    let mut filter = DocumentFilter::new();
    for (path, condition) in conditions {
        let key = if path.starts_with(ATTRIBUTE_BAG) {
            path.clone()
        } else {
            format!("{ATTRIBUTE_BAG}.{path}")
        };
        let value = match condition {
            Condition::OneOf(list) => json!({ "$in": list }),
            Condition::Operator(ops) => Value::Object(ops.clone()),
            Condition::Equals(scalar) => scalar.clone(),
        };
        filter.insert(key, value);
    }
    filter
}

/// 按点号路径在属性袋内解析值
///
/// 首段等于属性袋名时先剥离，中间任何一段缺失即返回 `None`。
pub fn resolve_path<'a>(attrs: &'a Value, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.').peekable();
    if segments.peek() == Some(&ATTRIBUTE_BAG) {
        segments.next();
    }
    let mut current = attrs;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// 分析动作：一条规则派发时为每个动作产生一个任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub analysis_method_id: String,
    pub config_id: String,
    /// 分析结果的目标存储实例
    pub target_instance: String,
}

/// 路由规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub rule_id: String,
    pub rule_name: String,
    #[serde(default)]
    pub description: String,
    /// 条件键为属性路径，全部条件同时成立才算匹配；空条件匹配所有记录
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,
    pub actions: Vec<RuleAction>,
    /// 触发本规则的派发入口，为空时默认为 `[rule_id]`
    #[serde(default)]
    pub router_ids: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_enabled")]
    pub backfill_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl RoutingRule {
    /// 判断一条记录的属性袋是否满足本规则
    pub fn matches(&self, attrs: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(path, condition)| condition.matches(resolve_path(attrs, path)))
    }

    /// 将条件编译为记录存储的原生过滤文档
    ///
    /// 回填时的"排除已处理记录"子句由仓储层附加，不在此文档内。
    pub fn compile_query(&self) -> DocumentFilter {
        compile_conditions(&self.conditions)
    }

    /// 创建/更新前的完整性校验
    pub fn validate(&self) -> RouterResult<()> {
        if self.rule_id.trim().is_empty() {
            return Err(RouterError::InvalidRule("rule_id 不能为空".to_string()));
        }
        if self.rule_name.trim().is_empty() {
            return Err(RouterError::InvalidRule("rule_name 不能为空".to_string()));
        }
        if self.actions.is_empty() {
            return Err(RouterError::InvalidRule(
                "至少需要一个分析动作".to_string(),
            ));
        }
        for (index, action) in self.actions.iter().enumerate() {
            if action.analysis_method_id.trim().is_empty()
                || action.config_id.trim().is_empty()
                || action.target_instance.trim().is_empty()
            {
                return Err(RouterError::InvalidRule(format!(
                    "动作 {index} 缺少 analysis_method_id/config_id/target_instance"
                )));
            }
        }
        Ok(())
    }

    /// 填补缺省值：router_ids 为空时以 rule_id 作为唯一派发入口
    pub fn normalize(&mut self) {
        if self.router_ids.is_empty() {
            self.router_ids = vec![self.rule_id.clone()];
        }
    }

    pub fn handles_router_id(&self, router_id: &str) -> bool {
        self.router_ids.iter().any(|id| id == router_id)
    }
}
