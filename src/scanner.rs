use std::collections::BTreeMap;

use tracing::error;

use crate::errors::WeaveError;
use crate::model::{AccessCapability, ClassDef, Project};
use crate::registry::{Advice, AdviceKind, JoinpointRegistry};

/// Fully merged advices for one property of one class, partitioned by
/// access direction.
#[derive(Clone, Debug, Default)]
pub(crate) struct PropertyJoinpoint {
    pub(crate) implements: AccessCapability,
    pub(crate) is_override: bool,
    pub(crate) read: Vec<Advice>,
    pub(crate) write: Vec<Advice>,
}

/// Scanner output: the complete effective set of joinpoints for one class,
/// computed fresh per compile and discarded afterward.
#[derive(Clone, Debug, Default)]
pub(crate) struct EffectiveAdviceSet {
    pub(crate) methods: BTreeMap<String, Vec<Advice>>,
    pub(crate) properties: BTreeMap<String, PropertyJoinpoint>,
}

impl EffectiveAdviceSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.properties.is_empty()
    }
}

/// Resolve the effective advice set for a class.
///
/// Merge order is load-bearing: interface before/around advices fold in
/// first, the class's own advices second, interface after advices third, so
/// interface behavior always wraps outside the class's own. Configuration
/// errors are reported per member and that member is skipped; the rest of
/// the class still weaves.
pub(crate) fn scan(
    class: &ClassDef,
    project: &Project,
    registry: &JoinpointRegistry,
) -> EffectiveAdviceSet {
    let mut methods: BTreeMap<String, Vec<Advice>> = BTreeMap::new();

    for interface in &class.interfaces {
        fold_interface_phase(&mut methods, registry, interface, &[
            AdviceKind::Around,
            AdviceKind::Before,
        ]);
    }

    for (member, advices) in registry.method_joinpoints(&class.name) {
        methods.entry(member).or_default().extend(advices);
    }

    for interface in &class.interfaces {
        fold_interface_phase(&mut methods, registry, interface, &[AdviceKind::After]);
    }

    fold_abstract_chain(&mut methods, class, project, registry);

    let mut properties = BTreeMap::new();
    for (member, advices) in registry.property_joinpoints(&class.name) {
        match classify_property(class, project, &member) {
            Ok((implements, is_override)) => {
                let mut joinpoint = PropertyJoinpoint {
                    implements,
                    is_override,
                    read: Vec::new(),
                    write: Vec::new(),
                };
                for advice in advices {
                    match advice.kind {
                        AdviceKind::Read => joinpoint.read.push(advice),
                        AdviceKind::Write => joinpoint.write.push(advice),
                        _ => {}
                    }
                }
                properties.insert(member, joinpoint);
            }
            Err(err) => error!("{err}"),
        }
    }

    EffectiveAdviceSet {
        methods,
        properties,
    }
}

fn fold_interface_phase(
    methods: &mut BTreeMap<String, Vec<Advice>>,
    registry: &JoinpointRegistry,
    interface: &str,
    kinds: &[AdviceKind],
) {
    for (member, advices) in registry.method_joinpoints(interface) {
        for advice in advices {
            if kinds.contains(&advice.kind) {
                methods.entry(member.clone()).or_default().push(advice);
            }
        }
    }
}

/// Advice attached at an abstract-declaration site must still fire for every
/// concrete subclass: walk the parent chain for each concrete method while
/// the ancestors keep declaring it abstract, appending the advices bound at
/// each declaration site. Recursion ends at a class with no parent or a
/// parent that does not declare the method abstract.
fn fold_abstract_chain(
    methods: &mut BTreeMap<String, Vec<Advice>>,
    class: &ClassDef,
    project: &Project,
    registry: &JoinpointRegistry,
) {
    for method in project.concrete_methods(class) {
        let mut ancestor = project.parent_of(class);
        while let Some(parent) = ancestor {
            let declares_abstract = parent
                .method(&method.name)
                .is_some_and(|decl| decl.is_abstract);
            if !declares_abstract {
                break;
            }
            let inherited = registry.method_joinpoint(&parent.name, &method.name);
            if !inherited.is_empty() {
                methods
                    .entry(method.name.clone())
                    .or_default()
                    .extend(inherited);
            }
            ancestor = project.parent_of(parent);
        }
    }
}

/// Decide whether a property participates in weaving and with which
/// capabilities: declared locally (or in a direct mixin) with an accessor
/// annotation, or adopted by a class-level override declaration that walks
/// the extends chain for the original declaration.
fn classify_property(
    class: &ClassDef,
    project: &Project,
    name: &str,
) -> Result<(AccessCapability, bool), WeaveError> {
    if let Some(property) = project.property_of(class, name) {
        let capability = property.annotations();
        if capability.any() {
            return Ok((capability, false));
        }
    }

    if let Some(decl) = class.overrides.iter().find(|o| o.property == name) {
        if decl.capability.any() {
            let mut ancestor = Some(class);
            while let Some(current) = ancestor {
                if project.property_of(current, name).is_some() {
                    return Ok((decl.capability, true));
                }
                ancestor = project.parent_of(current);
            }
        }
        return Err(WeaveError::UnknownOverrideTarget {
            class: class.name.clone(),
            property: name.to_string(),
        });
    }

    Err(WeaveError::UnweavableProperty {
        class: class.name.clone(),
        property: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodDef, MixinDef, OverrideDecl, PropertyDef};
    use crate::registry::AdviceTarget;

    fn method(name: &str) -> MethodDef {
        MethodDef {
            name: name.to_string(),
            params: Vec::new(),
            is_static: false,
            is_abstract: false,
            returns_value: true,
        }
    }

    fn abstract_method(name: &str) -> MethodDef {
        MethodDef {
            is_abstract: true,
            ..method(name)
        }
    }

    fn class(name: &str) -> ClassDef {
        ClassDef {
            name: name.to_string(),
            parent: None,
            interfaces: Vec::new(),
            mixins: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            overrides: Vec::new(),
            source: String::new(),
        }
    }

    fn project_with(classes: Vec<ClassDef>, mixins: Vec<MixinDef>) -> Project {
        let mut project = Project::default();
        for class in classes {
            project.classes.insert(class.name.clone(), class);
        }
        for mixin in mixins {
            project.mixins.insert(mixin.name.clone(), mixin);
        }
        project
    }

    fn targets(advices: &[Advice]) -> Vec<&str> {
        advices.iter().map(|a| a.target.class.as_str()).collect()
    }

    #[test]
    fn merge_folds_interface_phases_around_own_advices() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Around,
            "Auditable",
            "save",
            AdviceTarget::new("A", "wrap"),
            vec!["joinpoint".to_string()],
        );
        registry.register(
            AdviceKind::Before,
            "Auditable",
            "save",
            AdviceTarget::new("B", "pre"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::Before,
            "Order",
            "save",
            AdviceTarget::new("C", "pre"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::After,
            "Order",
            "save",
            AdviceTarget::new("D", "post"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::After,
            "Auditable",
            "save",
            AdviceTarget::new("E", "post"),
            Vec::new(),
        );

        let mut order = class("Order");
        order.interfaces.push("Auditable".to_string());
        order.methods.push(method("save"));
        let project = project_with(vec![order], Vec::new());

        let effective = scan(project.class("Order").expect("class"), &project, &registry);

        let advices = effective.methods.get("save").expect("save advices");
        assert_eq!(vec!["A", "B", "C", "D", "E"], targets(advices));
    }

    #[test]
    fn abstract_chain_reaches_grandparent_declarations() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Before,
            "Root",
            "work",
            AdviceTarget::new("RootLog", "enter"),
            Vec::new(),
        );

        let mut root = class("Root");
        root.methods.push(abstract_method("work"));
        let mut base = class("Base");
        base.parent = Some("Root".to_string());
        base.methods.push(abstract_method("work"));
        let mut leaf = class("Leaf");
        leaf.parent = Some("Base".to_string());
        leaf.mixins.push("Working".to_string());
        let mixin = MixinDef {
            name: "Working".to_string(),
            methods: vec![method("work")],
            properties: Vec::new(),
        };
        let project = project_with(vec![root, base, leaf], vec![mixin]);

        let effective = scan(project.class("Leaf").expect("class"), &project, &registry);

        let advices = effective.methods.get("work").expect("work advices");
        assert_eq!(vec!["RootLog"], targets(advices));
    }

    #[test]
    fn abstract_chain_stops_at_concrete_ancestor() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Before,
            "Root",
            "work",
            AdviceTarget::new("RootLog", "enter"),
            Vec::new(),
        );

        let mut root = class("Root");
        root.methods.push(abstract_method("work"));
        let mut base = class("Base");
        base.parent = Some("Root".to_string());
        base.methods.push(method("work"));
        let mut leaf = class("Leaf");
        leaf.parent = Some("Base".to_string());
        leaf.methods.push(method("work"));
        let project = project_with(vec![root, base, leaf], Vec::new());

        let effective = scan(project.class("Leaf").expect("class"), &project, &registry);

        assert!(effective.methods.get("work").is_none());
    }

    #[test]
    fn annotated_property_is_classified_with_capabilities() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Read,
            "Order",
            "total",
            AdviceTarget::new("Stats", "observe"),
            vec!["total".to_string()],
        );

        let mut order = class("Order");
        order.properties.push(PropertyDef {
            name: "total".to_string(),
            doc: Some("Running total.\n@get @set".to_string()),
            type_name: Some("int".to_string()),
            element_type: None,
        });
        let project = project_with(vec![order], Vec::new());

        let effective = scan(project.class("Order").expect("class"), &project, &registry);

        let joinpoint = effective.properties.get("total").expect("total joinpoint");
        assert!(joinpoint.implements.read);
        assert!(joinpoint.implements.write);
        assert!(!joinpoint.is_override);
        assert_eq!(1, joinpoint.read.len());
        assert!(joinpoint.write.is_empty());
    }

    #[test]
    fn override_declaration_walks_the_extends_chain() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Write,
            "Invoice",
            "issued_at",
            AdviceTarget::new("Clock", "stamp"),
            Vec::new(),
        );

        let mut document = class("Document");
        document.properties.push(PropertyDef {
            name: "issued_at".to_string(),
            doc: None,
            type_name: Some("datetime".to_string()),
            element_type: None,
        });
        let mut invoice = class("Invoice");
        invoice.parent = Some("Document".to_string());
        invoice.overrides.push(OverrideDecl {
            property: "issued_at".to_string(),
            capability: AccessCapability {
                read: false,
                write: true,
            },
        });
        let project = project_with(vec![document, invoice], Vec::new());

        let effective = scan(project.class("Invoice").expect("class"), &project, &registry);

        let joinpoint = effective
            .properties
            .get("issued_at")
            .expect("issued_at joinpoint");
        assert!(joinpoint.is_override);
        assert!(joinpoint.implements.write);
        assert_eq!(1, joinpoint.write.len());
    }

    #[test]
    fn unresolvable_property_joinpoints_are_skipped() {
        let mut registry = JoinpointRegistry::new();
        registry.register(
            AdviceKind::Read,
            "Order",
            "phantom",
            AdviceTarget::new("Stats", "observe"),
            Vec::new(),
        );
        registry.register(
            AdviceKind::Read,
            "Order",
            "missing",
            AdviceTarget::new("Stats", "observe"),
            Vec::new(),
        );

        let mut order = class("Order");
        order.overrides.push(OverrideDecl {
            property: "missing".to_string(),
            capability: AccessCapability {
                read: true,
                write: false,
            },
        });
        let project = project_with(vec![order], Vec::new());

        let effective = scan(project.class("Order").expect("class"), &project, &registry);

        assert!(effective.properties.is_empty());
    }
}
