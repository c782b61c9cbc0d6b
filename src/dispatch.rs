#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

use crate::source::SHADOW_PREFIX;
use crate::weave::{AdviceCall, InnerCall, MethodPlan, PropertyPlan, PropertySlot, WeavePlan, WrapperBody};

/// Runtime value vocabulary threaded through advice chains.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Receiver object: a shared, mutable field map.
#[derive(Clone, Debug, Default)]
pub(crate) struct Receiver {
    fields: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl Receiver {
    pub(crate) fn new() -> Self {
        Receiver::default()
    }

    pub(crate) fn set_field(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_string(), value);
    }

    pub(crate) fn get_field(&self, name: &str) -> Value {
        self.fields
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub(crate) fn has_field(&self, name: &str) -> bool {
        self.fields.borrow().contains_key(name)
    }

    pub(crate) fn remove_field(&self, name: &str) -> Option<Value> {
        self.fields.borrow_mut().remove(name)
    }
}

/// Runtime control handle for one intercepted call. Advices that declared a
/// `joinpoint` parameter may mutate the argument snapshot before the
/// underlying procedure runs, override the running result, or raise `stop`
/// to end the remaining chain early.
#[derive(Debug)]
pub(crate) struct Joinpoint {
    pub(crate) class_name: String,
    pub(crate) member: String,
    pub(crate) args: Vec<Value>,
    pub(crate) result: Value,
    pub(crate) stop: bool,
}

#[derive(Error, Debug)]
pub(crate) enum DispatchError {
    #[error("no advice callable bound for {class}::{method}")]
    UnknownAdvice { class: String, method: String },
    #[error("no native body bound for {class}::{name}")]
    UnknownProcedure { class: String, name: String },
    #[error("{class}::{member} is not a woven member")]
    NotWoven { class: String, member: String },
    #[error("process() is only available to around advice")]
    NoProcess,
}

type ProceedFn<'a> = &'a mut dyn FnMut(&mut Joinpoint) -> Result<Value, DispatchError>;

/// Everything an advice callable receives: the receiver, the control
/// handle, and its declared parameters resolved by name.
pub(crate) struct AdviceArgs<'a> {
    pub(crate) object: &'a Receiver,
    pub(crate) jp: &'a mut Joinpoint,
    params: BTreeMap<String, Value>,
    proceed: Option<ProceedFn<'a>>,
}

impl AdviceArgs<'_> {
    pub(crate) fn param(&self, name: &str) -> Value {
        self.params.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Invoke the next link in the advice chain, eventually the original
    /// member body. Only around advice holds this capability.
    pub(crate) fn process(&mut self) -> Result<Value, DispatchError> {
        let Some(proceed) = self.proceed.as_mut() else {
            return Err(DispatchError::NoProcess);
        };
        let value = proceed(&mut *self.jp)?;
        self.jp.result = value.clone();
        Ok(value)
    }
}

pub(crate) type AdviceFn = Box<dyn Fn(&mut AdviceArgs<'_>) -> Result<Option<Value>, DispatchError>>;
pub(crate) type NativeFn = Box<dyn Fn(&Receiver, &[Value]) -> Value>;

/// Callable bindings for one woven class: advice targets plus the native
/// procedure bodies the generated wrappers dispatch to (keyed by their
/// post-rename names in the woven source).
#[derive(Default)]
pub(crate) struct AdviceTable {
    advices: BTreeMap<(String, String), AdviceFn>,
    natives: BTreeMap<(String, String), NativeFn>,
}

impl AdviceTable {
    pub(crate) fn new() -> Self {
        AdviceTable::default()
    }

    pub(crate) fn bind_advice<F>(&mut self, class: &str, method: &str, advice: F)
    where
        F: Fn(&mut AdviceArgs<'_>) -> Result<Option<Value>, DispatchError> + 'static,
    {
        self.advices
            .insert((class.to_string(), method.to_string()), Box::new(advice));
    }

    pub(crate) fn bind_native<F>(&mut self, class: &str, name: &str, body: F)
    where
        F: Fn(&Receiver, &[Value]) -> Value + 'static,
    {
        self.natives
            .insert((class.to_string(), name.to_string()), Box::new(body));
    }
}

/// Interpreter over one woven class's dispatch table: wrapper chains for
/// methods, the generic accessor logic for properties.
pub(crate) struct Dispatcher<'a> {
    plan: &'a WeavePlan,
    table: &'a AdviceTable,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(plan: &'a WeavePlan, table: &'a AdviceTable) -> Self {
        Dispatcher { plan, table }
    }

    /// Invoke a woven method through its public entry wrapper.
    pub(crate) fn call(
        &self,
        recv: &Receiver,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, DispatchError> {
        let plan = self
            .plan
            .methods
            .get(method)
            .ok_or_else(|| DispatchError::NotWoven {
                class: self.plan.class.clone(),
                member: method.to_string(),
            })?;
        self.exec_link(plan, &plan.entry, recv, args)
    }

    fn exec_link(
        &self,
        plan: &MethodPlan,
        name: &str,
        recv: &Receiver,
        args: Vec<Value>,
    ) -> Result<Value, DispatchError> {
        match plan.links.get(name) {
            Some(wrapper) => self.exec_wrapper(plan, wrapper, recv, args),
            None => self.call_native(name, recv, &args),
        }
    }

    fn exec_wrapper(
        &self,
        plan: &MethodPlan,
        wrapper: &WrapperBody,
        recv: &Receiver,
        args: Vec<Value>,
    ) -> Result<Value, DispatchError> {
        let mut jp = Joinpoint {
            class_name: self.plan.class.clone(),
            member: plan.entry.clone(),
            args,
            result: Value::Null,
            stop: false,
        };

        for call in &wrapper.before {
            let produced = self.run_advice(call, recv, &mut jp, None, None)?;
            let adopted = produced.filter(|v| !v.is_null());
            if call.wants("result") {
                if let Some(value) = adopted.clone() {
                    return Ok(value);
                }
            }
            if call.wants("joinpoint") && jp.stop {
                if let Some(value) = adopted {
                    jp.result = value;
                }
                return Ok(jp.result);
            }
        }

        let value = match &wrapper.call {
            InnerCall::Proc(target) => {
                let inner_args = jp.args.clone();
                self.exec_link(plan, target, recv, inner_args)?
            }
            InnerCall::Around { advice, process } => {
                let mut proceed = |jp: &mut Joinpoint| {
                    let inner_args = jp.args.clone();
                    self.exec_link(plan, process, recv, inner_args)
                };
                let produced = self.run_advice(
                    advice,
                    recv,
                    &mut jp,
                    None,
                    Some(&mut proceed as ProceedFn<'_>),
                )?;
                match produced.filter(|v| !v.is_null()) {
                    Some(value) => value,
                    None => jp.result.clone(),
                }
            }
        };
        jp.result = value;

        for call in &wrapper.after {
            let produced = self.run_advice(call, recv, &mut jp, None, None)?;
            let adopted = produced.filter(|v| !v.is_null());
            if call.wants("result") {
                if let Some(value) = adopted {
                    jp.result = value;
                }
            }
            if call.wants("joinpoint") && jp.stop {
                return Ok(jp.result);
            }
        }
        Ok(jp.result)
    }

    /// Construct-time migration: move every intercepted property's field
    /// value (or implicit default) into its shadow backing slot.
    pub(crate) fn init_properties(&self, recv: &Receiver) -> Result<(), DispatchError> {
        let Some(plan) = &self.plan.properties else {
            return Ok(());
        };
        if let Some(fallback) = &plan.init_fallback {
            self.call_native(fallback, recv, &[])?;
        }
        for name in plan.slots.keys() {
            let value = recv.remove_field(name).unwrap_or(Value::Null);
            recv.set_field(&shadow(name), value);
        }
        Ok(())
    }

    /// Generic read accessor over the property dispatch table.
    pub(crate) fn get(&self, recv: &Receiver, name: &str) -> Result<Value, DispatchError> {
        let Some(plan) = &self.plan.properties else {
            return Ok(recv.get_field(name));
        };
        if name.starts_with(SHADOW_PREFIX) {
            return self.read_fallback(plan, recv, name);
        }
        let Some(slot) = plan.slots.get(name) else {
            return self.read_fallback(plan, recv, name);
        };

        let initial = if slot.is_override && plan.get_fallback.is_some() {
            self.read_fallback(plan, recv, name)?
        } else {
            recv.get_field(&shadow(name))
        };
        let mut jp = Joinpoint {
            class_name: self.plan.class.clone(),
            member: name.to_string(),
            args: Vec::new(),
            result: initial,
            stop: false,
        };
        let chain: &[AdviceCall] = if slot.implements.read { &slot.read } else { &[] };
        for call in chain {
            let produced = self.run_advice(call, recv, &mut jp, Some(slot), None)?;
            let adopted = produced.filter(|v| !v.is_null());
            if call.wants("result") || call.wants(name) {
                if let Some(value) = adopted {
                    jp.result = value;
                }
            }
            if call.wants("joinpoint") && jp.stop {
                break;
            }
        }
        recv.set_field(&shadow(name), jp.result.clone());
        Ok(jp.result)
    }

    /// Generic write accessor: each write advice may transform or reject
    /// the incoming value before it is committed to the shadow slot.
    pub(crate) fn set(
        &self,
        recv: &Receiver,
        name: &str,
        value: Value,
    ) -> Result<(), DispatchError> {
        let Some(plan) = &self.plan.properties else {
            recv.set_field(name, value);
            return Ok(());
        };
        if name.starts_with(SHADOW_PREFIX) {
            return self.write_fallback(plan, recv, name, value);
        }
        let Some(slot) = plan.slots.get(name) else {
            return self.write_fallback(plan, recv, name, value);
        };

        let mut jp = Joinpoint {
            class_name: self.plan.class.clone(),
            member: name.to_string(),
            args: Vec::new(),
            result: value,
            stop: false,
        };
        let chain: &[AdviceCall] = if slot.implements.write { &slot.write } else { &[] };
        for call in chain {
            let produced = self.run_advice(call, recv, &mut jp, Some(slot), None)?;
            let adopted = produced.filter(|v| !v.is_null());
            if call.wants("result") || call.wants(name) {
                if let Some(value) = adopted {
                    jp.result = value;
                }
            }
            if call.wants("joinpoint") && jp.stop {
                // rejected: nothing is committed
                return Ok(());
            }
        }
        if slot.is_override && plan.set_fallback.is_some() {
            self.write_fallback(plan, recv, name, jp.result)
        } else {
            recv.set_field(&shadow(name), jp.result);
            Ok(())
        }
    }

    /// Existence passthrough: intercepted properties defer to the shadow
    /// slot's own presence.
    pub(crate) fn has(&self, recv: &Receiver, name: &str) -> Result<bool, DispatchError> {
        let Some(plan) = &self.plan.properties else {
            return Ok(recv.has_field(name));
        };
        if plan.slots.contains_key(name) {
            return Ok(recv.has_field(&shadow(name)));
        }
        match &plan.has_fallback {
            Some(fallback) => {
                let value = self.call_native(fallback, recv, &[Value::Str(name.to_string())])?;
                Ok(truthy(&value))
            }
            None => Ok(recv.has_field(name)),
        }
    }

    /// Removal passthrough for intercepted properties.
    pub(crate) fn clear(&self, recv: &Receiver, name: &str) -> Result<(), DispatchError> {
        let Some(plan) = &self.plan.properties else {
            recv.remove_field(name);
            return Ok(());
        };
        if plan.slots.contains_key(name) {
            recv.remove_field(&shadow(name));
            return Ok(());
        }
        match &plan.clear_fallback {
            Some(fallback) => {
                self.call_native(fallback, recv, &[Value::Str(name.to_string())])?;
                Ok(())
            }
            None => {
                recv.remove_field(name);
                Ok(())
            }
        }
    }

    fn read_fallback(
        &self,
        plan: &PropertyPlan,
        recv: &Receiver,
        name: &str,
    ) -> Result<Value, DispatchError> {
        match &plan.get_fallback {
            Some(fallback) => self.call_native(fallback, recv, &[Value::Str(name.to_string())]),
            None => Ok(recv.get_field(name)),
        }
    }

    fn write_fallback(
        &self,
        plan: &PropertyPlan,
        recv: &Receiver,
        name: &str,
        value: Value,
    ) -> Result<(), DispatchError> {
        match &plan.set_fallback {
            Some(fallback) => {
                self.call_native(fallback, recv, &[Value::Str(name.to_string()), value])?;
                Ok(())
            }
            None => {
                recv.set_field(name, value);
                Ok(())
            }
        }
    }

    fn run_advice<'r>(
        &self,
        call: &AdviceCall,
        recv: &'r Receiver,
        jp: &'r mut Joinpoint,
        slot: Option<&PropertySlot>,
        proceed: Option<ProceedFn<'r>>,
    ) -> Result<Option<Value>, DispatchError> {
        let key = (call.target.class.clone(), call.target.method.clone());
        let advice = self
            .table
            .advices
            .get(&key)
            .ok_or_else(|| DispatchError::UnknownAdvice {
                class: call.target.class.clone(),
                method: call.target.method.clone(),
            })?;
        let params = bind_params(call, jp, slot);
        let mut args = AdviceArgs {
            object: recv,
            jp,
            params,
            proceed,
        };
        advice(&mut args)
    }

    fn call_native(
        &self,
        name: &str,
        recv: &Receiver,
        args: &[Value],
    ) -> Result<Value, DispatchError> {
        let key = (self.plan.class.clone(), name.to_string());
        let native = self
            .table
            .natives
            .get(&key)
            .ok_or_else(|| DispatchError::UnknownProcedure {
                class: self.plan.class.clone(),
                name: name.to_string(),
            })?;
        Ok(native(recv, args))
    }
}

/// Resolve an advice's declared parameters by name. The receiver and the
/// control handle are bound as explicit arguments; everything else flows
/// through the value map.
fn bind_params(
    call: &AdviceCall,
    jp: &Joinpoint,
    slot: Option<&PropertySlot>,
) -> BTreeMap<String, Value> {
    let meta = |value: &Option<String>| {
        value
            .as_ref()
            .map_or(Value::Null, |v| Value::Str(v.clone()))
    };
    let mut params = BTreeMap::new();
    for name in &call.params {
        let value = match name.as_str() {
            "object" | "joinpoint" => continue,
            "result" => jp.result.clone(),
            "property" => Value::Str(jp.member.clone()),
            "type" | "type_name" => meta(&slot.and_then(|s| s.type_name.clone())),
            "element_type" | "element_type_name" => meta(&slot.and_then(|s| s.element_type.clone())),
            other if slot.is_some() && other == jp.member => jp.result.clone(),
            _ => Value::Null,
        };
        params.insert(name.clone(), value);
    }
    params
}

fn shadow(name: &str) -> String {
    format!("{SHADOW_PREFIX}{name}")
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Int(number) => *number != 0,
        Value::Str(text) => !text.is_empty(),
    }
}
