use std::collections::BTreeMap;

use tracing::{debug, error};

use crate::errors::WeaveError;
use crate::model::Project;
use crate::registry::JoinpointRegistry;
use crate::scanner::scan;
use crate::source::{contains_marker, SourceUnit};
use crate::weave::method::weave_method;
use crate::weave::property::weave_properties;
use crate::weave::WeavePlan;

/// Orchestrates one compilation pass: scanner, property weaver, method
/// weaver, source assembly. The registry is an explicit dependency so
/// independent passes never share ambient state.
pub(crate) struct Compiler<'a> {
    registry: &'a JoinpointRegistry,
    plans: BTreeMap<String, WeavePlan>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(registry: &'a JoinpointRegistry) -> Self {
        Compiler {
            registry,
            plans: BTreeMap::new(),
        }
    }

    /// Dispatch table retained for a class woven during this pass.
    pub(crate) fn plan(&self, class: &str) -> Option<&WeavePlan> {
        self.plans.get(class)
    }

    /// Weave every class of the working set in lexical order, isolating
    /// per-class failures so one bad class never aborts the batch.
    pub(crate) fn compile_all(&mut self, project: &mut Project) -> BTreeMap<String, bool> {
        let names: Vec<String> = project.classes.keys().cloned().collect();
        let mut results = BTreeMap::new();
        for name in names {
            let woven = match self.compile(project, &name) {
                Ok(woven) => woven,
                Err(err) => {
                    error!("{err}");
                    false
                }
            };
            results.insert(name, woven);
        }
        results
    }

    /// Weave one class. Returns false without touching the source when the
    /// weave marker is already present or nothing applies to the class.
    pub(crate) fn compile(
        &mut self,
        project: &mut Project,
        name: &str,
    ) -> Result<bool, WeaveError> {
        let Some(class) = project.class(name) else {
            return Err(WeaveError::UnknownClass {
                name: name.to_string(),
            });
        };
        if contains_marker(class.get_source()) {
            debug!(class = name, "already woven, skipping");
            return Ok(false);
        }
        let class = class.clone();
        let effective = scan(&class, project, self.registry);
        if effective.is_empty() {
            return Ok(false);
        }

        let mut unit = SourceUnit::parse(class.get_source());
        let mut plan = WeavePlan {
            class: name.to_string(),
            ..WeavePlan::default()
        };
        let mut woven = false;

        // all properties weave at once: the synthesized accessors are
        // shared infrastructure across every intercepted property
        if !effective.properties.is_empty() {
            let properties = weave_properties(&class, project, &effective.properties, &mut unit);
            if !properties.slots.is_empty() {
                plan.properties = Some(properties);
                woven = true;
            }
        }

        for (method_name, advices) in &effective.methods {
            let Some(def) = project.method_of(&class, method_name) else {
                error!(
                    "{}",
                    WeaveError::MissingMember {
                        class: name.to_string(),
                        member: method_name.clone(),
                    }
                );
                continue;
            };
            match weave_method(name, def, advices, &mut unit) {
                Ok(method_plan) => {
                    plan.methods.insert(method_name.clone(), method_plan);
                    woven = true;
                }
                Err(err) => error!("{err}"),
            }
        }

        if !woven {
            return Ok(false);
        }
        unit.mark_woven();
        let rendered = unit.render();
        if let Some(target) = project.class_mut(name) {
            target.set_source(rendered);
        }
        self.plans.insert(name.to_string(), plan);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::dispatch::{AdviceArgs, AdviceTable, Dispatcher, Receiver, Value};
    use crate::model::{ClassDef, MethodDef, MixinDef};
    use crate::registry::{AdviceKind, AdviceTarget};

    fn method(name: &str) -> MethodDef {
        MethodDef {
            name: name.to_string(),
            params: Vec::new(),
            is_static: false,
            is_abstract: false,
            returns_value: true,
        }
    }

    fn class_with_save(name: &str) -> ClassDef {
        ClassDef {
            name: name.to_string(),
            parent: None,
            interfaces: Vec::new(),
            mixins: Vec::new(),
            methods: vec![method("save")],
            properties: Vec::new(),
            overrides: Vec::new(),
            source: "proc save() {\n    return store(this)\n}\n".to_string(),
        }
    }

    fn project_of(classes: Vec<ClassDef>) -> Project {
        let mut project = Project::default();
        for class in classes {
            project.classes.insert(class.name.clone(), class);
        }
        project
    }

    fn log_advice(log: &Rc<RefCell<Vec<String>>>, label: &str, table: &mut AdviceTable) {
        let log = Rc::clone(log);
        let tag = label.to_string();
        table.bind_advice(label, "apply", move |_args: &mut AdviceArgs<'_>| {
            log.borrow_mut().push(tag.clone());
            Ok(None)
        });
    }

    fn log_native(log: &Rc<RefCell<Vec<String>>>, class: &str, name: &str, table: &mut AdviceTable) {
        let log = Rc::clone(log);
        table.bind_native(class, name, move |_recv, _args| {
            log.borrow_mut().push("original".to_string());
            Value::Int(1)
        });
    }

    #[test]
    fn compiling_twice_is_idempotent() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Before,
            "Order",
            "save",
            AdviceTarget::new("Validator", "apply"),
            Vec::new(),
        );
        let mut project = project_of(vec![class_with_save("Order")]);
        let mut compiler = Compiler::new(&registry);

        assert!(compiler.compile(&mut project, "Order").expect("first pass"));
        let woven_source = project.class("Order").expect("class").get_source().to_string();
        assert!(contains_marker(&woven_source));

        assert!(!compiler.compile(&mut project, "Order").expect("second pass"));
        assert_eq!(
            woven_source,
            project.class("Order").expect("class").get_source()
        );
    }

    #[test]
    fn interface_phases_wrap_outside_the_class_advices() {
        // interface: A(around), B(before), E(after); class: C(before), D(after)
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Around,
            "Auditable",
            "save",
            AdviceTarget::new("A", "apply"),
            vec!["joinpoint".to_string()],
        );
        registry.register(
            AdviceKind::Before,
            "Auditable",
            "save",
            AdviceTarget::new("B", "apply"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::Before,
            "Order",
            "save",
            AdviceTarget::new("C", "apply"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::After,
            "Order",
            "save",
            AdviceTarget::new("D", "apply"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::After,
            "Auditable",
            "save",
            AdviceTarget::new("E", "apply"),
            Vec::new(),
        );

        let mut order = class_with_save("Order");
        order.interfaces.push("Auditable".to_string());
        let mut project = project_of(vec![order]);
        let mut compiler = Compiler::new(&registry);
        assert!(compiler.compile(&mut project, "Order").expect("compile"));

        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let mut table = AdviceTable::new();
        {
            let log = Rc::clone(&log);
            table.bind_advice("A", "apply", move |args: &mut AdviceArgs<'_>| {
                log.borrow_mut().push("A-enter".to_string());
                let value = args.process()?;
                log.borrow_mut().push("A-exit".to_string());
                Ok(Some(value))
            });
        }
        for label in ["B", "C", "D", "E"] {
            log_advice(&log, label, &mut table);
        }
        log_native(&log, "Order", "save_1", &mut table);

        let plan = compiler.plan("Order").expect("plan");
        let dispatcher = Dispatcher::new(plan, &table);
        dispatcher
            .call(&Receiver::new(), "save", Vec::new())
            .expect("call save");

        assert_eq!(
            vec![
                "A-enter".to_string(),
                "B".to_string(),
                "C".to_string(),
                "original".to_string(),
                "D".to_string(),
                "E".to_string(),
                "A-exit".to_string(),
            ],
            *log.borrow()
        );
    }

    #[test]
    fn audit_scenario_runs_advices_in_contract_order() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Before,
            "Auditable",
            "save",
            AdviceTarget::new("LogStart", "apply"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::Before,
            "Order",
            "save",
            AdviceTarget::new("Validate", "apply"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::After,
            "Order",
            "save",
            AdviceTarget::new("Notify", "apply"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::After,
            "Auditable",
            "save",
            AdviceTarget::new("LogEnd", "apply"),
            Vec::new(),
        );

        let mut order = class_with_save("Order");
        order.interfaces.push("Auditable".to_string());
        let mut project = project_of(vec![order]);
        let mut compiler = Compiler::new(&registry);
        assert!(compiler.compile(&mut project, "Order").expect("compile"));

        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let mut table = AdviceTable::new();
        for label in ["LogStart", "Validate", "Notify", "LogEnd"] {
            log_advice(&log, label, &mut table);
        }
        log_native(&log, "Order", "save_1", &mut table);

        let plan = compiler.plan("Order").expect("plan");
        let dispatcher = Dispatcher::new(plan, &table);
        dispatcher
            .call(&Receiver::new(), "save", Vec::new())
            .expect("call save");

        assert_eq!(
            vec![
                "LogStart".to_string(),
                "Validate".to_string(),
                "original".to_string(),
                "Notify".to_string(),
                "LogEnd".to_string(),
            ],
            *log.borrow()
        );
    }

    #[test]
    fn abstract_chain_advice_fires_for_the_concrete_leaf() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Before,
            "Root",
            "work",
            AdviceTarget::new("RootLog", "apply"),
            Vec::new(),
        );

        let mut root = ClassDef {
            name: "Root".to_string(),
            parent: None,
            interfaces: Vec::new(),
            mixins: Vec::new(),
            methods: vec![method("work")],
            properties: Vec::new(),
            overrides: Vec::new(),
            source: String::new(),
        };
        root.methods[0].is_abstract = true;
        let mut base = root.clone();
        base.name = "Base".to_string();
        base.parent = Some("Root".to_string());
        let leaf = ClassDef {
            name: "Leaf".to_string(),
            parent: Some("Base".to_string()),
            interfaces: Vec::new(),
            mixins: vec!["Working".to_string()],
            methods: Vec::new(),
            properties: Vec::new(),
            overrides: Vec::new(),
            source: "proc work() {\n    return effort(this)\n}\n".to_string(),
        };
        let mut project = project_of(vec![root, base, leaf]);
        project.mixins.insert(
            "Working".to_string(),
            MixinDef {
                name: "Working".to_string(),
                methods: vec![method("work")],
                properties: Vec::new(),
            },
        );

        let mut compiler = Compiler::new(&registry);
        let results = compiler.compile_all(&mut project);
        assert_eq!(Some(&true), results.get("Leaf"));
        assert_eq!(Some(&false), results.get("Root"));

        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let mut table = AdviceTable::new();
        log_advice(&log, "RootLog", &mut table);
        log_native(&log, "Leaf", "work_1", &mut table);

        let plan = compiler.plan("Leaf").expect("plan");
        let dispatcher = Dispatcher::new(plan, &table);
        dispatcher
            .call(&Receiver::new(), "work", Vec::new())
            .expect("call work");

        assert_eq!(
            vec!["RootLog".to_string(), "original".to_string()],
            *log.borrow()
        );
    }

    #[test]
    fn one_failing_class_does_not_abort_the_batch() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Before,
            "Broken",
            "vanish",
            AdviceTarget::new("Validator", "apply"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::Before,
            "Order",
            "save",
            AdviceTarget::new("Validator", "apply"),
            Vec::new(),
        );

        let mut broken = class_with_save("Broken");
        broken.methods = vec![method("vanish")];
        broken.source = "// body for vanish is missing\n".to_string();
        let mut project = project_of(vec![broken, class_with_save("Order")]);

        let mut compiler = Compiler::new(&registry);
        let results = compiler.compile_all(&mut project);

        assert_eq!(Some(&false), results.get("Broken"));
        assert_eq!(Some(&true), results.get("Order"));
        assert!(contains_marker(
            project.class("Order").expect("class").get_source()
        ));
        assert!(!contains_marker(
            project.class("Broken").expect("class").get_source()
        ));
    }

    #[test]
    fn unknown_classes_are_a_configuration_error() {
        let registry = JoinpointRegistry::new();
        let mut project = Project::default();
        let mut compiler = Compiler::new(&registry);

        let err = compiler
            .compile(&mut project, "Ghost")
            .expect_err("unknown class must fail");
        assert!(matches!(err, WeaveError::UnknownClass { .. }));
    }
}
