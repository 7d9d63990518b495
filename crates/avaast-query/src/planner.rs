//! Compiles a [`Query`] into an ordered [`Plan`]. Planning is a pure shape
//! transform: it does not resolve field references, validate collection
//! names, or otherwise inspect data. Semantic errors surface later, during
//! execution.

use crate::ast::{Expression, Join, OrderByKey, Query, SelectField, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStepKind {
    Fetch,
    Join,
    Filter,
    Group,
    Having,
    Select,
    Distinct,
    OrderBy,
    Limit,
}

#[derive(Debug, Clone)]
pub enum PlanStep {
    Fetch { source: Source },
    Join { join: Join },
    Filter { predicate: Expression },
    Group { keys: Vec<Expression> },
    Having { predicate: Expression },
    Select { fields: Vec<SelectField> },
    Distinct,
    OrderBy { keys: Vec<OrderByKey> },
    Limit { limit: Option<i64>, offset: Option<i64> },
}

impl PlanStep {
    pub fn kind(&self) -> PlanStepKind {
        match self {
            PlanStep::Fetch { .. } => PlanStepKind::Fetch,
            PlanStep::Join { .. } => PlanStepKind::Join,
            PlanStep::Filter { .. } => PlanStepKind::Filter,
            PlanStep::Group { .. } => PlanStepKind::Group,
            PlanStep::Having { .. } => PlanStepKind::Having,
            PlanStep::Select { .. } => PlanStepKind::Select,
            PlanStep::Distinct => PlanStepKind::Distinct,
            PlanStep::OrderBy { .. } => PlanStepKind::OrderBy,
            PlanStep::Limit { .. } => PlanStepKind::Limit,
        }
    }
}

/// The canonical, ordered execution pipeline for a query: fetch, then each
/// declared join in order, then optional filter/group/having, then the
/// mandatory select, then optional distinct/orderBy/limit.
#[derive(Debug, Clone)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

pub fn plan(query: &Query) -> Plan {
    let mut steps = Vec::with_capacity(query.joins.len() + 6);

    steps.push(PlanStep::Fetch {
        source: query.from.clone(),
    });

    for join in &query.joins {
        steps.push(PlanStep::Join { join: join.clone() });
    }

    if let Some(predicate) = &query.where_ {
        steps.push(PlanStep::Filter {
            predicate: predicate.clone(),
        });
    }

    if !query.group_by.is_empty() {
        steps.push(PlanStep::Group {
            keys: query.group_by.clone(),
        });
    }

    if let Some(predicate) = &query.having {
        steps.push(PlanStep::Having {
            predicate: predicate.clone(),
        });
    }

    steps.push(PlanStep::Select {
        fields: query.select.clone(),
    });

    if query.distinct {
        steps.push(PlanStep::Distinct);
    }

    if !query.order_by.is_empty() {
        steps.push(PlanStep::OrderBy {
            keys: query.order_by.clone(),
        });
    }

    if query.limit.is_some() || query.offset.is_some() {
        steps.push(PlanStep::Limit {
            limit: query.limit,
            offset: query.offset,
        });
    }

    Plan { steps }
}
