use std::collections::BTreeMap;

use crate::model::{ClassDef, Project, PropertyDef};
use crate::scanner::PropertyJoinpoint;
use crate::source::{ProcDecl, SourceUnit, SHADOW_PREFIX};
use crate::weave::{call_expr, AdviceCall, PropertyPlan, PropertySlot};

const INIT_PROC: &str = "init_properties";
const GET_PROC: &str = "get_property";
const SET_PROC: &str = "set_property";
const HAS_PROC: &str = "has_property";
const CLEAR_PROC: &str = "clear_property";

/// Synthesize the shared virtual-accessor infrastructure for every
/// intercepted property of a class: construct-time migration into shadow
/// backing slots, the generic read/write accessors threading the advice
/// chains, and the existence/removal passthroughs.
///
/// User-declared accessor procedures are composed with, not replaced: they
/// are renamed to a numbered variant and invoked as the fallback for
/// properties the generated logic does not handle.
pub(crate) fn weave_properties(
    class: &ClassDef,
    project: &Project,
    joinpoints: &BTreeMap<String, PropertyJoinpoint>,
    unit: &mut SourceUnit,
) -> PropertyPlan {
    let mut plan = PropertyPlan::default();

    for (name, joinpoint) in joinpoints {
        let read: Vec<AdviceCall> = joinpoint.read.iter().map(AdviceCall::from_advice).collect();
        let write: Vec<AdviceCall> = joinpoint.write.iter().map(AdviceCall::from_advice).collect();
        let mut slot = PropertySlot {
            implements: joinpoint.implements,
            is_override: joinpoint.is_override,
            read,
            write,
            type_name: None,
            element_type: None,
        };
        // reflective metadata is only resolved when an advice asked for it
        let calls = slot.read.iter().chain(slot.write.iter());
        let wants_type = calls
            .clone()
            .any(|c| c.wants("type") || c.wants("type_name"));
        let wants_element = calls
            .clone()
            .any(|c| c.wants("element_type") || c.wants("element_type_name"));
        if wants_type || wants_element {
            if let Some(decl) = find_declaration(class, project, name) {
                if wants_type {
                    slot.type_name = decl.type_name.clone();
                }
                if wants_element {
                    slot.element_type = decl.element_type.clone();
                }
            }
        }
        plan.slots.insert(name.clone(), slot);
    }

    plan.init_fallback = adopt_user_accessor(unit, INIT_PROC);
    plan.get_fallback = adopt_user_accessor(unit, GET_PROC);
    plan.set_fallback = adopt_user_accessor(unit, SET_PROC);
    plan.has_fallback = adopt_user_accessor(unit, HAS_PROC);
    plan.clear_fallback = adopt_user_accessor(unit, CLEAR_PROC);

    unit.push_proc(render_init(&plan));
    unit.push_proc(render_get(class, &plan));
    unit.push_proc(render_set(class, &plan));
    unit.push_proc(render_has(&plan));
    unit.push_proc(render_clear(&plan));

    plan
}

/// Walk the property declaration down the class, its mixins, then the
/// extends chain, mirroring the scanner's override resolution.
fn find_declaration<'a>(
    class: &'a ClassDef,
    project: &'a Project,
    name: &str,
) -> Option<&'a PropertyDef> {
    let mut ancestor = Some(class);
    while let Some(current) = ancestor {
        if let Some(decl) = project.property_of(current, name) {
            return Some(decl);
        }
        ancestor = project.parent_of(current);
    }
    None
}

fn adopt_user_accessor(unit: &mut SourceUnit, name: &str) -> Option<String> {
    if !unit.has_proc(name) {
        return None;
    }
    let variant = unit.variant_name(name);
    unit.rename_proc(name, &variant);
    Some(variant)
}

fn shadow(name: &str) -> String {
    format!("{SHADOW_PREFIX}{name}")
}

fn render_init(plan: &PropertyPlan) -> ProcDecl {
    let mut lines = Vec::new();
    if let Some(fallback) = &plan.init_fallback {
        lines.push(format!("    this.{fallback}()"));
    }
    for name in plan.slots.keys() {
        lines.push(format!(
            "    this.{} = take_field(this, \"{name}\")",
            shadow(name)
        ));
    }
    ProcDecl {
        is_static: false,
        name: INIT_PROC.to_string(),
        params: Vec::new(),
        body: lines,
    }
}

fn render_get(class: &ClassDef, plan: &PropertyPlan) -> ProcDecl {
    let passthrough = match &plan.get_fallback {
        Some(fallback) => format!("return this.{fallback}(name)"),
        None => "return field(this, name)".to_string(),
    };
    let mut lines = vec![format!(
        "    if starts_with(name, \"{SHADOW_PREFIX}\") {{ {passthrough} }}"
    )];
    for (name, slot) in &plan.slots {
        lines.push(format!("    if name == \"{name}\" {{"));
        let initial = match (&plan.get_fallback, slot.is_override) {
            (Some(fallback), true) => format!("this.{fallback}(name)"),
            _ => format!("this.{}", shadow(name)),
        };
        lines.push(format!("        value = {initial}"));
        render_chain(&mut lines, class, name, slot, &slot.read, ChainMode::Read);
        lines.push(format!("        this.{} = value", shadow(name)));
        lines.push("        return value".to_string());
        lines.push("    }".to_string());
    }
    lines.push(format!("    {passthrough}"));
    ProcDecl {
        is_static: false,
        name: GET_PROC.to_string(),
        params: vec!["name".to_string()],
        body: lines,
    }
}

fn render_set(class: &ClassDef, plan: &PropertyPlan) -> ProcDecl {
    let passthrough = match &plan.set_fallback {
        Some(fallback) => format!("this.{fallback}(name, value)"),
        None => "set_field(this, name, value)".to_string(),
    };
    let mut lines = vec![format!(
        "    if starts_with(name, \"{SHADOW_PREFIX}\") {{ {passthrough}; return }}"
    )];
    for (name, slot) in &plan.slots {
        lines.push(format!("    if name == \"{name}\" {{"));
        render_chain(&mut lines, class, name, slot, &slot.write, ChainMode::Write);
        let commit = match (&plan.set_fallback, slot.is_override) {
            (Some(fallback), true) => format!("this.{fallback}(name, value)"),
            _ => format!("this.{} = value", shadow(name)),
        };
        lines.push(format!("        {commit}"));
        lines.push("        return".to_string());
        lines.push("    }".to_string());
    }
    lines.push(format!("    {passthrough}"));
    ProcDecl {
        is_static: false,
        name: SET_PROC.to_string(),
        params: vec!["name".to_string(), "value".to_string()],
        body: lines,
    }
}

fn render_has(plan: &PropertyPlan) -> ProcDecl {
    let passthrough = match &plan.has_fallback {
        Some(fallback) => format!("return this.{fallback}(name)"),
        None => "return has_field(this, name)".to_string(),
    };
    let mut lines = Vec::new();
    for name in plan.slots.keys() {
        lines.push(format!(
            "    if name == \"{name}\" {{ return has_field(this, \"{}\") }}",
            shadow(name)
        ));
    }
    lines.push(format!("    {passthrough}"));
    ProcDecl {
        is_static: false,
        name: HAS_PROC.to_string(),
        params: vec!["name".to_string()],
        body: lines,
    }
}

fn render_clear(plan: &PropertyPlan) -> ProcDecl {
    let passthrough = match &plan.clear_fallback {
        Some(fallback) => format!("this.{fallback}(name)"),
        None => "clear_field(this, name)".to_string(),
    };
    let mut lines = Vec::new();
    for name in plan.slots.keys() {
        lines.push(format!(
            "    if name == \"{name}\" {{ clear_field(this, \"{}\"); return }}",
            shadow(name)
        ));
    }
    lines.push(format!("    {passthrough}"));
    ProcDecl {
        is_static: false,
        name: CLEAR_PROC.to_string(),
        params: vec!["name".to_string()],
        body: lines,
    }
}

enum ChainMode {
    Read,
    Write,
}

fn render_chain(
    lines: &mut Vec<String>,
    class: &ClassDef,
    property: &str,
    slot: &PropertySlot,
    chain: &[AdviceCall],
    mode: ChainMode,
) {
    let needs_jp = chain.iter().any(|c| c.wants("joinpoint"));
    if needs_jp {
        lines.push(format!(
            "        jp = joinpoint(\"{}\", \"{property}\", [])",
            class.name
        ));
    }
    for call in chain {
        let expr = call_expr(call, |param| property_binding(param, property, slot));
        lines.push(format!("        step = {expr}"));
        if call.wants("result") || call.wants(property) {
            lines.push("        if step != null { value = step }".to_string());
        }
        if call.wants("joinpoint") {
            let on_stop = match mode {
                ChainMode::Read => format!(
                    "        if jp.stop {{ this.{} = value; return value }}",
                    shadow(property)
                ),
                ChainMode::Write => "        if jp.stop { return }".to_string(),
            };
            lines.push(on_stop);
        }
    }
}

fn property_binding(param: &str, property: &str, slot: &PropertySlot) -> String {
    let quoted = |value: &Option<String>| {
        value
            .as_ref()
            .map_or("null".to_string(), |v| format!("\"{v}\""))
    };
    match param {
        "object" => "this".to_string(),
        "result" => "value".to_string(),
        "joinpoint" => "jp".to_string(),
        "property" => format!("\"{property}\""),
        "type" | "type_name" => quoted(&slot.type_name),
        "element_type" | "element_type_name" => quoted(&slot.element_type),
        name if name == property => "value".to_string(),
        _ => "null".to_string(),
    }
}
