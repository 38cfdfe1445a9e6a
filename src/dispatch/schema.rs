//! 声明式参数 Schema 与参数编组
//!
//! 每个操作用一张静态字段表（字段名 → 类型）描述请求形状，marshal_request 按表把
//! 远程 Agent 给出的松散 JSON 参数转换为类型化的 Params：
//! - 标量（string / integer / boolean）类型不符时静默跳过，字段保持未设置
//! - 字符串数组逐元素校验，非字符串元素被丢弃
//! - 嵌套对象与对象数组递归转换，对象数组中的非对象元素被丢弃
//! - 请求级保留字段 metadata / expand 单独累积
//! - 必填字段转换后仍缺失时返回 ArgumentShapeInvalid（带点分路径）

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::core::ActionError;

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    StringList,
    /// map<string, string>，非字符串值被丢弃
    StringMap,
    Object(&'static [Field]),
    ObjectList(&'static [Field]),
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl Field {
    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }
}

/// 编组后的字段值
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    StringList(Vec<String>),
    StringMap(BTreeMap<String, String>),
    Object(Params),
    ObjectList(Vec<Params>),
}

/// 类型化请求：只包含字段表中声明过的字段，外加请求级 metadata / expand
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    fields: BTreeMap<&'static str, ParamValue>,
    metadata: BTreeMap<String, String>,
    expand: Vec<String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(ParamValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set(&mut self, name: &'static str, value: ParamValue) {
        self.fields.insert(name, value);
    }

    pub fn take(&mut self, name: &str) -> Option<ParamValue> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// 已设置的声明字段数（不含 metadata / expand）
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.metadata.is_empty() && self.expand.is_empty()
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn add_expand(&mut self, path: impl Into<String>) {
        self.expand.push(path.into());
    }

    pub fn expand(&self) -> &[String] {
        &self.expand
    }

    /// Stripe 风格的表单编码：`a[b]=`、`a[0]=`、`metadata[k]=`、`expand[0]=`
    pub fn to_form_pairs(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        encode_params(self, "", &mut out);
        for (k, v) in &self.metadata {
            out.push((format!("metadata[{k}]"), v.clone()));
        }
        for (i, path) in self.expand.iter().enumerate() {
            out.push((format!("expand[{i}]"), path.clone()));
        }
        out
    }

    /// 转回 JSON（审计预览与测试断言用）
    pub fn to_json(&self) -> Value {
        let mut obj: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.to_string(), value_to_json(v)))
            .collect();
        if !self.metadata.is_empty() {
            obj.insert("metadata".to_string(), json!(self.metadata));
        }
        if !self.expand.is_empty() {
            obj.insert("expand".to_string(), json!(self.expand));
        }
        Value::Object(obj)
    }
}

fn value_to_json(value: &ParamValue) -> Value {
    match value {
        ParamValue::String(s) => json!(s),
        ParamValue::Integer(n) => json!(n),
        ParamValue::Boolean(b) => json!(b),
        ParamValue::StringList(items) => json!(items),
        ParamValue::StringMap(map) => json!(map),
        ParamValue::Object(p) => p.to_json(),
        ParamValue::ObjectList(items) => Value::Array(items.iter().map(Params::to_json).collect()),
    }
}

fn encode_params(params: &Params, prefix: &str, out: &mut Vec<(String, String)>) {
    for (name, value) in &params.fields {
        let key = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}[{name}]")
        };
        encode_value(value, &key, out);
    }
}

fn encode_value(value: &ParamValue, key: &str, out: &mut Vec<(String, String)>) {
    match value {
        ParamValue::String(s) => out.push((key.to_string(), s.clone())),
        ParamValue::Integer(n) => out.push((key.to_string(), n.to_string())),
        ParamValue::Boolean(b) => out.push((key.to_string(), b.to_string())),
        ParamValue::StringList(items) => {
            for (i, item) in items.iter().enumerate() {
                out.push((format!("{key}[{i}]"), item.clone()));
            }
        }
        ParamValue::StringMap(map) => {
            for (k, v) in map {
                out.push((format!("{key}[{k}]"), v.clone()));
            }
        }
        ParamValue::Object(p) => encode_params(p, key, out),
        ParamValue::ObjectList(items) => {
            for (i, p) in items.iter().enumerate() {
                encode_params(p, &format!("{key}[{i}]"), out);
            }
        }
    }
}

const RESERVED_METADATA: &str = "metadata";
const RESERVED_EXPAND: &str = "expand";

/// 按字段表编组请求参数（含请求级 metadata / expand）
pub fn marshal_request(
    fields: &'static [Field],
    args: &Map<String, Value>,
) -> Result<Params, ActionError> {
    let mut params = marshal_object(fields, args, "")?;

    if let Some(Value::Object(meta)) = args.get(RESERVED_METADATA) {
        for (k, v) in meta {
            if let Value::String(s) = v {
                params.add_metadata(k.clone(), s.clone());
            }
        }
    }
    if let Some(Value::Array(paths)) = args.get(RESERVED_EXPAND) {
        for path in paths.iter().filter_map(Value::as_str) {
            params.add_expand(path);
        }
    }

    Ok(params)
}

fn marshal_object(
    fields: &'static [Field],
    args: &Map<String, Value>,
    prefix: &str,
) -> Result<Params, ActionError> {
    let mut params = Params::new();

    for field in fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };

        if let Some(value) = args.get(field.name) {
            match convert(field.kind, value, &path)? {
                Some(converted) => params.set(field.name, converted),
                None if !value.is_null() => {
                    tracing::debug!(field = %path, "argument skipped: type mismatch");
                }
                None => {}
            }
        }

        if field.required && !params.contains(field.name) {
            return Err(ActionError::ArgumentShapeInvalid(format!(
                "missing required field `{path}`"
            )));
        }
    }

    for key in args.keys() {
        let declared = fields.iter().any(|f| f.name == key);
        let reserved = prefix.is_empty() && (key == RESERVED_METADATA || key == RESERVED_EXPAND);
        if !declared && !reserved {
            tracing::debug!(field = %key, "argument ignored: not in schema");
        }
    }

    Ok(params)
}

fn convert(kind: FieldKind, value: &Value, path: &str) -> Result<Option<ParamValue>, ActionError> {
    let converted = match kind {
        FieldKind::String => value.as_str().map(|s| ParamValue::String(s.to_string())),
        FieldKind::Integer => as_integer(value).map(ParamValue::Integer),
        FieldKind::Boolean => value.as_bool().map(ParamValue::Boolean),
        FieldKind::StringList => value.as_array().map(|items| {
            ParamValue::StringList(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect(),
            )
        }),
        FieldKind::StringMap => value.as_object().map(|obj| {
            ParamValue::StringMap(
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect(),
            )
        }),
        FieldKind::Object(nested) => match value.as_object() {
            Some(obj) => Some(ParamValue::Object(marshal_object(nested, obj, path)?)),
            None => None,
        },
        FieldKind::ObjectList(nested) => match value.as_array() {
            Some(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if let Some(obj) = item.as_object() {
                        out.push(marshal_object(nested, obj, &format!("{path}[{i}]"))?);
                    }
                }
                Some(ParamValue::ObjectList(out))
            }
            None => None,
        },
    };
    Ok(converted)
}

/// JSON 整数或整值浮点数（如 3.0）；非整值视为类型不符
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// 由字段表生成参数 JSON Schema（供 /api/operations 展示）
pub fn parameters_schema(fields: &'static [Field]) -> Value {
    let mut schema = object_schema(fields);
    if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        props.insert(
            RESERVED_METADATA.to_string(),
            json!({ "type": "object", "additionalProperties": { "type": "string" } }),
        );
        props.insert(
            RESERVED_EXPAND.to_string(),
            json!({ "type": "array", "items": { "type": "string" } }),
        );
    }
    schema
}

fn object_schema(fields: &'static [Field]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| (f.name.to_string(), kind_schema(f.kind)))
        .collect();
    let required: Vec<&str> = fields.iter().filter(|f| f.required).map(|f| f.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn kind_schema(kind: FieldKind) -> Value {
    match kind {
        FieldKind::String => json!({ "type": "string" }),
        FieldKind::Integer => json!({ "type": "integer" }),
        FieldKind::Boolean => json!({ "type": "boolean" }),
        FieldKind::StringList => json!({ "type": "array", "items": { "type": "string" } }),
        FieldKind::StringMap => {
            json!({ "type": "object", "additionalProperties": { "type": "string" } })
        }
        FieldKind::Object(nested) => object_schema(nested),
        FieldKind::ObjectList(nested) => json!({ "type": "array", "items": object_schema(nested) }),
    }
}
