#![allow(dead_code)]

pub(crate) mod method;
pub(crate) mod property;

use std::collections::BTreeMap;

use crate::model::AccessCapability;
use crate::registry::{Advice, AdviceTarget};

/// One advice invocation site inside a synthesized wrapper.
#[derive(Clone, Debug)]
pub(crate) struct AdviceCall {
    pub(crate) target: AdviceTarget,
    pub(crate) params: Vec<String>,
}

impl AdviceCall {
    pub(crate) fn from_advice(advice: &Advice) -> Self {
        AdviceCall {
            target: advice.target.clone(),
            params: advice.params.clone(),
        }
    }

    /// Parameter binding is by name: an advice only receives what it declared.
    pub(crate) fn wants(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }
}

/// Inner link a wrapper dispatches to between its before and after chains.
#[derive(Clone, Debug)]
pub(crate) enum InnerCall {
    /// Plain dispatch to a named procedure: the renamed original body or the
    /// next numbered variant.
    Proc(String),
    /// Around advice holding the `process` capability for the named variant.
    Around {
        advice: AdviceCall,
        process: String,
    },
}

/// Synthesized wrapper body: before chain, inner call, after chain.
#[derive(Clone, Debug)]
pub(crate) struct WrapperBody {
    pub(crate) before: Vec<AdviceCall>,
    pub(crate) call: InnerCall,
    pub(crate) after: Vec<AdviceCall>,
}

/// Execution plan for one woven method: the public entry wrapper plus one
/// numbered variant per around link, down to the renamed original body.
#[derive(Clone, Debug)]
pub(crate) struct MethodPlan {
    pub(crate) entry: String,
    pub(crate) original: String,
    pub(crate) links: BTreeMap<String, WrapperBody>,
    pub(crate) is_static: bool,
    pub(crate) returns_value: bool,
}

/// Shadow-slot and advice-chain plan for one intercepted property. The
/// reflective metadata fields are only populated when an advice actually
/// declared a parameter requesting them.
#[derive(Clone, Debug, Default)]
pub(crate) struct PropertySlot {
    pub(crate) implements: AccessCapability,
    pub(crate) is_override: bool,
    pub(crate) read: Vec<AdviceCall>,
    pub(crate) write: Vec<AdviceCall>,
    pub(crate) type_name: Option<String>,
    pub(crate) element_type: Option<String>,
}

/// Per-class virtual-accessor dispatch table shared by every intercepted
/// property. A fallback names the renamed user-declared accessor the
/// generated one composes with.
#[derive(Clone, Debug, Default)]
pub(crate) struct PropertyPlan {
    pub(crate) slots: BTreeMap<String, PropertySlot>,
    pub(crate) init_fallback: Option<String>,
    pub(crate) get_fallback: Option<String>,
    pub(crate) set_fallback: Option<String>,
    pub(crate) has_fallback: Option<String>,
    pub(crate) clear_fallback: Option<String>,
}

/// Everything woven for one class: method chains plus the property table.
#[derive(Clone, Debug, Default)]
pub(crate) struct WeavePlan {
    pub(crate) class: String,
    pub(crate) methods: BTreeMap<String, MethodPlan>,
    pub(crate) properties: Option<PropertyPlan>,
}

/// Render an advice call site with named-argument syntax, making the
/// by-name binding contract visible in the generated source.
pub(crate) fn call_expr(call: &AdviceCall, bind: impl Fn(&str) -> String) -> String {
    let args = call
        .params
        .iter()
        .map(|p| format!("{p}: {}", bind(p)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}::{}({args})", call.target.class, call.target.method)
}
