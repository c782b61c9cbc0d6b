use std::collections::BTreeMap;

use crate::errors::WeaveError;
use crate::model::MethodDef;
use crate::registry::{Advice, AdviceKind};
use crate::source::{ProcDecl, SourceUnit};
use crate::weave::{call_expr, AdviceCall, InnerCall, MethodPlan, WrapperBody};

/// Synthesize the interception chain for one method.
///
/// The advice list is processed in reverse declaration order: before/after
/// fragments accumulate so that execution order equals declaration order,
/// and every around advice flushes the accumulation into a fresh numbered
/// variant that becomes its `process` target. The first-declared around
/// therefore ends up as the outermost public entry point, and the renamed
/// original body is always the innermost link.
pub(crate) fn weave_method(
    class: &str,
    def: &MethodDef,
    advices: &[Advice],
    unit: &mut SourceUnit,
) -> Result<MethodPlan, WeaveError> {
    let original = unit.variant_name(&def.name);
    if !unit.rename_proc(&def.name, &original) {
        return Err(WeaveError::MissingMember {
            class: class.to_string(),
            member: def.name.clone(),
        });
    }

    let mut links: BTreeMap<String, WrapperBody> = BTreeMap::new();
    let mut before: Vec<AdviceCall> = Vec::new();
    let mut after: Vec<AdviceCall> = Vec::new();
    let mut inner = InnerCall::Proc(original.clone());

    for advice in advices.iter().rev() {
        match advice.kind {
            AdviceKind::Before => before.insert(0, AdviceCall::from_advice(advice)),
            AdviceKind::After => after.insert(0, AdviceCall::from_advice(advice)),
            AdviceKind::Around => {
                let variant = unit.variant_name(&def.name);
                links.insert(
                    variant.clone(),
                    WrapperBody {
                        before: std::mem::take(&mut before),
                        call: inner,
                        after: std::mem::take(&mut after),
                    },
                );
                inner = InnerCall::Around {
                    advice: AdviceCall::from_advice(advice),
                    process: variant,
                };
            }
            // property kinds are partitioned out by the scanner
            AdviceKind::Read | AdviceKind::Write => continue,
        }
    }

    links.insert(
        def.name.clone(),
        WrapperBody {
            before,
            call: inner,
            after,
        },
    );

    for (name, body) in &links {
        unit.push_proc(render_wrapper(class, name, def, body));
    }

    Ok(MethodPlan {
        entry: def.name.clone(),
        original,
        links,
        is_static: def.is_static,
        returns_value: def.returns_value,
    })
}

/// Render one wrapper link as a procedure declaration. Static-ness and the
/// declared return value are propagated verbatim from the original
/// signature into every synthesized variant.
fn render_wrapper(class: &str, name: &str, def: &MethodDef, body: &WrapperBody) -> ProcDecl {
    let mut lines = Vec::new();
    let needs_jp = body
        .before
        .iter()
        .chain(body.after.iter())
        .any(|c| c.wants("joinpoint"))
        || matches!(body.call, InnerCall::Around { .. });
    let args = def.params.join(", ");

    if needs_jp {
        let process = match &body.call {
            InnerCall::Around { process, .. } => format!(", process = {process}"),
            InnerCall::Proc(_) => String::new(),
        };
        lines.push(format!(
            "    jp = joinpoint(\"{class}\", \"{}\", [{args}]{process})",
            def.name
        ));
    }
    lines.push("    result = null".to_string());

    for call in &body.before {
        lines.push(format!("    step = {}", call_expr(call, method_binding)));
        if call.wants("result") {
            lines.push("    if step != null { return step }".to_string());
        }
        if call.wants("joinpoint") {
            lines.push("    if jp.stop { return jp.result }".to_string());
        }
    }

    match &body.call {
        InnerCall::Proc(target) => {
            let receiver = if def.is_static { "" } else { "this." };
            let call_args = if needs_jp { "...jp.args" } else { args.as_str() };
            lines.push(format!("    result = {receiver}{target}({call_args})"));
        }
        InnerCall::Around { advice, .. } => {
            lines.push(format!("    result = {}", call_expr(advice, method_binding)));
        }
    }

    for call in &body.after {
        lines.push(format!("    step = {}", call_expr(call, method_binding)));
        if call.wants("result") {
            lines.push("    if step != null { result = step }".to_string());
        }
        if call.wants("joinpoint") {
            lines.push("    if jp.stop { return jp.result }".to_string());
        }
    }

    if def.returns_value {
        lines.push("    return result".to_string());
    }

    ProcDecl {
        is_static: def.is_static,
        name: name.to_string(),
        params: def.params.clone(),
        body: lines,
    }
}

fn method_binding(param: &str) -> String {
    match param {
        "object" => "this".to_string(),
        "result" => "result".to_string(),
        "joinpoint" => "jp".to_string(),
        _ => "null".to_string(),
    }
}
