//! The declarative query AST: the root `Query` node plus its tagged
//! `Expression` variants. Published computed-record bodies deserialize
//! directly into these types.

use serde::{Deserialize, Serialize};

/// A source collection to read from, optionally scoped to a specific
/// authority. `collection` may carry a `:updates` or `:deletes` suffix to
/// route the fetch to the Change Log instead of live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub alias: String,
    pub collection: String,
    #[serde(rename = "authorityId", skip_serializing_if = "Option::is_none")]
    pub authority_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOpKind {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithmeticOpKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    #[serde(rename = "when")]
    pub when: Expression,
    #[serde(rename = "then")]
    pub then: Expression,
}

/// Tagged-variant expression tree. The `type` discriminator mirrors the
/// platform's other polymorphic wire shapes rather than relying on
/// subclass-style dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expression {
    #[serde(rename = "fieldRef")]
    FieldRef {
        #[serde(rename = "sourceAlias")]
        source_alias: String,
        #[serde(rename = "fieldPath")]
        field_path: String,
    },
    #[serde(rename = "literal")]
    Literal {
        #[serde(rename = "stringValue", default, skip_serializing_if = "Option::is_none")]
        string_value: Option<String>,
        #[serde(rename = "integerValue", default, skip_serializing_if = "Option::is_none")]
        integer_value: Option<i64>,
        #[serde(rename = "booleanValue", default, skip_serializing_if = "Option::is_none")]
        boolean_value: Option<bool>,
    },
    #[serde(rename = "comparison")]
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Box<Expression>>,
    },
    #[serde(rename = "logicalOp")]
    LogicalOp {
        op: LogicalOpKind,
        operands: Vec<Expression>,
    },
    #[serde(rename = "arithmeticOp")]
    ArithmeticOp {
        op: ArithmeticOpKind,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    #[serde(rename = "builtinCall")]
    BuiltinCall { name: String, args: Vec<Expression> },
    #[serde(rename = "functionCall")]
    FunctionCall {
        #[serde(rename = "ref")]
        reference: String,
        args: Vec<Expression>,
    },
    #[serde(rename = "caseExpression")]
    CaseExpression {
        branches: Vec<CaseBranch>,
        #[serde(rename = "elseValue", default, skip_serializing_if = "Option::is_none")]
        else_value: Option<Box<Expression>>,
    },
}

impl Expression {
    pub fn field(source_alias: impl Into<String>, field_path: impl Into<String>) -> Self {
        Expression::FieldRef {
            source_alias: source_alias.into(),
            field_path: field_path.into(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal {
            string_value: Some(value.into()),
            integer_value: None,
            boolean_value: None,
        }
    }

    pub fn integer(value: i64) -> Self {
        Expression::Literal {
            string_value: None,
            integer_value: Some(value),
            boolean_value: None,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Expression::Literal {
            string_value: None,
            integer_value: None,
            boolean_value: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectField {
    pub alias: String,
    pub expr: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

impl Default for NullsOrder {
    fn default() -> Self {
        NullsOrder::Last
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByKey {
    pub expr: Expression,
    pub direction: SortDirection,
    #[serde(default)]
    pub nulls: NullsOrder,
}

/// The root query AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub select: Vec<SelectField>,
    pub from: Source,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<Expression>,
    #[serde(rename = "groupBy", default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Expression>,
    #[serde(rename = "orderBy", default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderByKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default)]
    pub distinct: bool,
}
