use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reflective method descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MethodDef {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) params: Vec<String>,
    #[serde(default)]
    pub(crate) is_static: bool,
    #[serde(default)]
    pub(crate) is_abstract: bool,
    #[serde(default)]
    pub(crate) returns_value: bool,
}

/// Reflective property descriptor, including its raw doc text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PropertyDef {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) doc: Option<String>,
    #[serde(default)]
    pub(crate) type_name: Option<String>,
    #[serde(default)]
    pub(crate) element_type: Option<String>,
}

impl PropertyDef {
    /// Accessor capability declared by the property's doc annotations.
    /// `@link` marks a relation accessor and implies both directions.
    pub(crate) fn annotations(&self) -> AccessCapability {
        let Some(doc) = &self.doc else {
            return AccessCapability::default();
        };
        let mut capability = AccessCapability::default();
        for token in doc.split_whitespace() {
            match token {
                "@get" => capability.read = true,
                "@set" => capability.write = true,
                "@link" => {
                    capability.read = true;
                    capability.write = true;
                }
                _ => {}
            }
        }
        capability
    }
}

/// Read/write capability of a woven property accessor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct AccessCapability {
    #[serde(default)]
    pub(crate) read: bool,
    #[serde(default)]
    pub(crate) write: bool,
}

impl AccessCapability {
    pub(crate) fn any(self) -> bool {
        self.read || self.write
    }
}

/// Class-level declaration adopting an inherited property for weaving.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct OverrideDecl {
    pub(crate) property: String,
    #[serde(default)]
    pub(crate) capability: AccessCapability,
}

/// Directly-mixed-in behavior unit providing reusable members.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MixinDef {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) methods: Vec<MethodDef>,
    #[serde(default)]
    pub(crate) properties: Vec<PropertyDef>,
}

/// Reflective class descriptor. The source text is expected to carry every
/// concrete procedure body, mixin-provided ones already flattened in by the
/// descriptor producer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ClassDef {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) parent: Option<String>,
    #[serde(default)]
    pub(crate) interfaces: Vec<String>,
    #[serde(default)]
    pub(crate) mixins: Vec<String>,
    #[serde(default)]
    pub(crate) methods: Vec<MethodDef>,
    #[serde(default)]
    pub(crate) properties: Vec<PropertyDef>,
    #[serde(default)]
    pub(crate) overrides: Vec<OverrideDecl>,
    #[serde(default)]
    pub(crate) source: String,
}

impl ClassDef {
    pub(crate) fn get_source(&self) -> &str {
        &self.source
    }

    pub(crate) fn set_source(&mut self, text: String) {
        self.source = text;
    }

    pub(crate) fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub(crate) fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Working set of sources handed to one compilation pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct Project {
    #[serde(default)]
    pub(crate) classes: BTreeMap<String, ClassDef>,
    #[serde(default)]
    pub(crate) mixins: BTreeMap<String, MixinDef>,
}

impl Project {
    pub(crate) fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    pub(crate) fn class_mut(&mut self, name: &str) -> Option<&mut ClassDef> {
        self.classes.get_mut(name)
    }

    pub(crate) fn parent_of(&self, class: &ClassDef) -> Option<&ClassDef> {
        class.parent.as_deref().and_then(|p| self.classes.get(p))
    }

    /// Concrete method signature for a class: its own non-abstract
    /// declaration, or one provided by a directly-mixed-in unit.
    pub(crate) fn method_of<'a>(&'a self, class: &'a ClassDef, name: &str) -> Option<&'a MethodDef> {
        if let Some(method) = class.method(name) {
            if !method.is_abstract {
                return Some(method);
            }
        }
        for mixin_name in &class.mixins {
            if let Some(mixin) = self.mixins.get(mixin_name) {
                if let Some(method) = mixin.methods.iter().find(|m| m.name == name) {
                    return Some(method);
                }
            }
        }
        None
    }

    /// Property declared in the class itself or a directly-mixed-in unit.
    pub(crate) fn property_of<'a>(&'a self, class: &'a ClassDef, name: &str) -> Option<&'a PropertyDef> {
        if let Some(property) = class.property(name) {
            return Some(property);
        }
        for mixin_name in &class.mixins {
            if let Some(mixin) = self.mixins.get(mixin_name) {
                if let Some(property) = mixin.properties.iter().find(|p| p.name == name) {
                    return Some(property);
                }
            }
        }
        None
    }

    /// Every concrete method of a class, own members first, then mixin
    /// members in mixin declaration order.
    pub(crate) fn concrete_methods<'a>(&'a self, class: &'a ClassDef) -> Vec<&'a MethodDef> {
        let mut methods: Vec<&MethodDef> = class.methods.iter().filter(|m| !m.is_abstract).collect();
        for mixin_name in &class.mixins {
            if let Some(mixin) = self.mixins.get(mixin_name) {
                for method in &mixin.methods {
                    if !methods.iter().any(|m| m.name == method.name) {
                        methods.push(method);
                    }
                }
            }
        }
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property_with_doc(name: &str, doc: &str) -> PropertyDef {
        PropertyDef {
            name: name.to_string(),
            doc: Some(doc.to_string()),
            type_name: None,
            element_type: None,
        }
    }

    #[test]
    fn annotations_detect_accessor_tags() {
        let read_only = property_with_doc("total", "The running total.\n@get");
        assert_eq!(
            AccessCapability {
                read: true,
                write: false
            },
            read_only.annotations()
        );

        let linked = property_with_doc("owner", "@link Customer");
        assert!(linked.annotations().read);
        assert!(linked.annotations().write);
    }

    #[test]
    fn annotations_ignore_undocumented_properties() {
        let bare = PropertyDef {
            name: "tag".to_string(),
            doc: None,
            type_name: None,
            element_type: None,
        };
        assert!(!bare.annotations().any());
    }

    #[test]
    fn method_of_prefers_own_concrete_declaration() {
        let mixin = MixinDef {
            name: "Persisting".to_string(),
            methods: vec![MethodDef {
                name: "save".to_string(),
                params: Vec::new(),
                is_static: false,
                is_abstract: false,
                returns_value: true,
            }],
            properties: Vec::new(),
        };
        let class = ClassDef {
            name: "Order".to_string(),
            parent: None,
            interfaces: Vec::new(),
            mixins: vec!["Persisting".to_string()],
            methods: vec![MethodDef {
                name: "save".to_string(),
                params: vec!["deep".to_string()],
                is_static: false,
                is_abstract: false,
                returns_value: true,
            }],
            properties: Vec::new(),
            overrides: Vec::new(),
            source: String::new(),
        };
        let mut project = Project::default();
        project.mixins.insert(mixin.name.clone(), mixin);
        project.classes.insert(class.name.clone(), class);

        let class = project.class("Order").expect("class");
        let method = project.method_of(class, "save").expect("method");
        assert_eq!(vec!["deep".to_string()], method.params);
    }

    #[test]
    fn method_of_falls_back_to_mixin_for_abstract_declaration() {
        let mixin = MixinDef {
            name: "Persisting".to_string(),
            methods: vec![MethodDef {
                name: "save".to_string(),
                params: Vec::new(),
                is_static: false,
                is_abstract: false,
                returns_value: true,
            }],
            properties: Vec::new(),
        };
        let class = ClassDef {
            name: "Order".to_string(),
            parent: None,
            interfaces: Vec::new(),
            mixins: vec!["Persisting".to_string()],
            methods: vec![MethodDef {
                name: "save".to_string(),
                params: Vec::new(),
                is_static: false,
                is_abstract: true,
                returns_value: true,
            }],
            properties: Vec::new(),
            overrides: Vec::new(),
            source: String::new(),
        };
        let mut project = Project::default();
        project.mixins.insert(mixin.name.clone(), mixin);
        project.classes.insert(class.name.clone(), class);

        let class = project.class("Order").expect("class");
        let method = project.method_of(class, "save").expect("method");
        assert!(!method.is_abstract);
    }
}
