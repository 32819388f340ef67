//! 文档过滤器到 SQL 的编译
//!
//! 把 `DocumentFilter` 翻译为 recordings 表 `info_features` 列上的
//! JSONB 条件。字段路径与操作数一律作为参数绑定，过滤器内容
//! 不会拼接进 SQL 文本。
//!
//! 语义与内存求值保持一致：
//! - `$ne` / `$nin` 对路径缺失的记录为真
//! - 比较操作只在值类型与操作数类型一致时成立
//! - 未知操作符、空操作符对象编译为 `FALSE`（宁可不发，不可误发）

use serde_json::Value;

use router_domain::rule::{DocumentFilter, ATTRIBUTE_BAG};

/// 过滤器编译出的绑定参数
#[derive(Debug, Clone, PartialEq)]
pub enum FilterParam {
    /// `#>` 取值用的字段路径，绑定为 TEXT[]
    JsonPath(Vec<String>),
    /// 操作数，绑定为 JSONB
    Json(Value),
}

/// 编译结果：子句之间由调用方以 AND 连接
#[derive(Debug, Clone)]
pub struct FilterSql {
    pub clauses: Vec<String>,
    pub params: Vec<FilterParam>,
}

impl FilterSql {
    /// 编译过滤器，占位符编号从 `start_index` 起
    /// （调用方之前已绑定 `start_index - 1` 个参数）
    pub fn compile(filter: &DocumentFilter, start_index: usize) -> Self {
        let mut builder = Builder {
            params: Vec::new(),
            next_index: start_index,
        };
        let clauses = filter
            .iter()
            .map(|(key, condition)| builder.condition_clause(key, condition))
            .collect();
        Self {
            clauses,
            params: builder.params,
        }
    }

    /// 追加到已有 WHERE 子句之后
    pub fn append_to(&self, sql: &mut String) {
        for clause in &self.clauses {
            sql.push_str(" AND ");
            sql.push_str(clause);
        }
    }
}

/// 按编译顺序绑定参数
pub fn bind_filter_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &'q [FilterParam],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            FilterParam::JsonPath(path) => query.bind(path),
            FilterParam::Json(value) => query.bind(value),
        };
    }
    query
}

/// `query_scalar` 版本，计数查询使用
pub fn bind_filter_params_scalar<'q, O>(
    mut query: sqlx::query::QueryScalar<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    params: &'q [FilterParam],
) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            FilterParam::JsonPath(path) => query.bind(path),
            FilterParam::Json(value) => query.bind(value),
        };
    }
    query
}

struct Builder {
    params: Vec<FilterParam>,
    next_index: usize,
}

impl Builder {
    fn condition_clause(&mut self, key: &str, condition: &Value) -> String {
        let path = field_path(key);
        match condition {
            // 裸数组与 {"$in": [...]} 等价
            Value::Array(choices) => self.membership_clause(&path, choices, false),
            Value::Object(operators) if operators.is_empty() => "FALSE".to_string(),
            Value::Object(operators) => {
                let parts: Vec<String> = operators
                    .iter()
                    .map(|(op, operand)| self.operator_clause(&path, op, operand))
                    .collect();
                if parts.len() == 1 {
                    parts.into_iter().next().unwrap_or_else(|| "FALSE".to_string())
                } else {
                    format!("({})", parts.join(" AND "))
                }
            }
            scalar => self.equality_clause(&path, scalar),
        }
    }

    fn operator_clause(&mut self, path: &[String], op: &str, operand: &Value) -> String {
        match op {
            "$eq" => self.equality_clause(path, operand),
            "$ne" => {
                let p = self.push_path(path);
                let v = self.push_json(operand);
                format!("{FEATURES} #> {p} IS DISTINCT FROM {v}")
            }
            "$gt" => self.comparison_clause(path, ">", operand),
            "$gte" => self.comparison_clause(path, ">=", operand),
            "$lt" => self.comparison_clause(path, "<", operand),
            "$lte" => self.comparison_clause(path, "<=", operand),
            "$in" => match operand {
                Value::Array(choices) => self.membership_clause(path, choices, false),
                _ => "FALSE".to_string(),
            },
            "$nin" => match operand {
                Value::Array(choices) => self.membership_clause(path, choices, true),
                _ => "FALSE".to_string(),
            },
            _ => "FALSE".to_string(),
        }
    }

    fn equality_clause(&mut self, path: &[String], operand: &Value) -> String {
        let p = self.push_path(path);
        let v = self.push_json(operand);
        format!("{FEATURES} #> {p} = {v}")
    }

    /// JSONB 的序在不同类型之间有定义，但与内存求值不一致，
    /// 故比较前先校验值类型与操作数类型相同
    fn comparison_clause(&mut self, path: &[String], sql_op: &str, operand: &Value) -> String {
        let type_name = match operand {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            _ => return "FALSE".to_string(),
        };
        let p = self.push_path(path);
        let v = self.push_json(operand);
        format!(
            "(jsonb_typeof({FEATURES} #> {p}) = '{type_name}' AND {FEATURES} #> {p} {sql_op} {v})"
        )
    }

    fn membership_clause(&mut self, path: &[String], choices: &[Value], negated: bool) -> String {
        let list = Value::Array(choices.to_vec());
        if negated {
            let p_null = self.push_path(path);
            let v = self.push_json(&list);
            let p = self.push_path(path);
            format!(
                "({FEATURES} #> {p_null} IS NULL OR NOT EXISTS \
                 (SELECT 1 FROM jsonb_array_elements({v}) AS elem \
                 WHERE elem.value = {FEATURES} #> {p}))"
            )
        } else {
            let v = self.push_json(&list);
            let p = self.push_path(path);
            format!(
                "EXISTS (SELECT 1 FROM jsonb_array_elements({v}) AS elem \
                 WHERE elem.value = {FEATURES} #> {p})"
            )
        }
    }

    fn push_path(&mut self, path: &[String]) -> String {
        self.params.push(FilterParam::JsonPath(path.to_vec()));
        self.placeholder()
    }

    fn push_json(&mut self, value: &Value) -> String {
        self.params.push(FilterParam::Json(value.clone()));
        self.placeholder()
    }

    fn placeholder(&mut self) -> String {
        let index = self.next_index;
        self.next_index += 1;
        format!("${index}")
    }
}

const FEATURES: &str = "info_features";

/// 键转字段路径：去掉属性袋前缀段，其余按 `.` 切分
fn field_path(key: &str) -> Vec<String> {
    let mut segments = key.split('.').peekable();
    if segments.peek() == Some(&ATTRIBUTE_BAG) {
        segments.next();
    }
    segments.map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: Value) -> DocumentFilter {
        match value {
            Value::Object(map) => map,
            other => panic!("过滤器必须是对象: {other}"),
        }
    }

    #[test]
    fn test_equality_binds_path_and_operand() {
        let sql = FilterSql::compile(
            &filter(json!({"info_features.device_type": "vibration"})),
            1,
        );
        assert_eq!(sql.clauses, vec!["info_features #> $1 = $2"]);
        assert_eq!(
            sql.params,
            vec![
                FilterParam::JsonPath(vec!["device_type".to_string()]),
                FilterParam::Json(json!("vibration")),
            ]
        );
    }

    #[test]
    fn test_prefix_stripped_nested_path_preserved() {
        let sql = FilterSql::compile(&filter(json!({"info_features.meta.site": "north"})), 1);
        assert_eq!(
            sql.params[0],
            FilterParam::JsonPath(vec!["meta".to_string(), "site".to_string()])
        );
    }

    #[test]
    fn test_range_operators_share_one_clause() {
        let sql = FilterSql::compile(
            &filter(json!({"info_features.duration": {"$gte": 5, "$lte": 60}})),
            1,
        );
        assert_eq!(sql.clauses.len(), 1);
        let clause = &sql.clauses[0];
        assert!(clause.starts_with('('));
        assert!(clause.contains("jsonb_typeof(info_features #> $1) = 'number'"));
        assert!(clause.contains("info_features #> $1 >= $2"));
        assert!(clause.contains("info_features #> $3 <= $4"));
        assert_eq!(sql.params.len(), 4);
    }

    #[test]
    fn test_ne_matches_missing_via_is_distinct_from() {
        let sql = FilterSql::compile(
            &filter(json!({"info_features.status": {"$ne": "archived"}})),
            1,
        );
        assert_eq!(
            sql.clauses,
            vec!["info_features #> $1 IS DISTINCT FROM $2"]
        );
    }

    #[test]
    fn test_in_compiles_to_exists_over_elements() {
        let sql = FilterSql::compile(
            &filter(json!({"info_features.device_type": {"$in": ["a", "b"]}})),
            1,
        );
        assert_eq!(sql.clauses.len(), 1);
        assert!(sql.clauses[0].contains("EXISTS"));
        assert!(sql.clauses[0].contains("jsonb_array_elements($1)"));
        assert!(sql.clauses[0].contains("elem.value = info_features #> $2"));
        assert_eq!(sql.params[0], FilterParam::Json(json!(["a", "b"])));
    }

    #[test]
    fn test_bare_array_is_membership() {
        let bare = FilterSql::compile(&filter(json!({"info_features.x": [1, 2]})), 1);
        let explicit = FilterSql::compile(&filter(json!({"info_features.x": {"$in": [1, 2]}})), 1);
        assert_eq!(bare.clauses, explicit.clauses);
    }

    #[test]
    fn test_nin_accepts_null_path() {
        let sql = FilterSql::compile(
            &filter(json!({"info_features.status": {"$nin": ["archived"]}})),
            1,
        );
        let clause = &sql.clauses[0];
        assert!(clause.contains("info_features #> $1 IS NULL OR NOT EXISTS"));
        // 路径绑定两次，参数顺序为 路径、列表、路径
        assert_eq!(sql.params.len(), 3);
        assert_eq!(sql.params[0], sql.params[2]);
    }

    #[test]
    fn test_fail_closed_clauses() {
        for condition in [
            json!({"$regex": "^a"}),
            json!({}),
            json!({"$in": "not-an-array"}),
            json!({"$nin": 7}),
            json!({"$gt": [1, 2]}),
        ] {
            let sql = FilterSql::compile(&filter(json!({"info_features.x": condition})), 1);
            assert_eq!(sql.clauses, vec!["FALSE"], "条件 {condition} 应编译为 FALSE");
            assert!(sql.params.is_empty());
        }
    }

    #[test]
    fn test_start_index_offsets_placeholders() {
        let sql = FilterSql::compile(&filter(json!({"info_features.x": 1})), 3);
        assert_eq!(sql.clauses, vec!["info_features #> $3 = $4"]);
    }

    #[test]
    fn test_append_to_joins_with_and() {
        let sql = FilterSql::compile(
            &filter(json!({"info_features.a": 1, "info_features.b": 2})),
            1,
        );
        let mut text = "SELECT 1 WHERE TRUE".to_string();
        sql.append_to(&mut text);
        assert_eq!(
            text,
            "SELECT 1 WHERE TRUE AND info_features #> $1 = $2 AND info_features #> $3 = $4"
        );
    }
}
