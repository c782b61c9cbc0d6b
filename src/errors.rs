use thiserror::Error;

/// Configuration-error taxonomy for the weaving pass.
///
/// Every variant names the offending class and member so diagnostics stay
/// actionable; a reported error skips that single member, never the batch.
#[derive(Error, Debug)]
pub(crate) enum WeaveError {
    /// An override declaration names a property absent from the whole extends chain.
    #[error("class {class}: override declaration references unknown property '{property}'")]
    UnknownOverrideTarget { class: String, property: String },

    /// A registered joinpoint has no locatable member to weave.
    #[error("class {class}: member '{member}' could not be located for weaving")]
    MissingMember { class: String, member: String },

    /// A property joinpoint that is neither annotated nor adopted by an override.
    #[error("class {class}: property '{property}' has no accessor annotation or override declaration")]
    UnweavableProperty { class: String, property: String },

    /// Compile target missing from the working set.
    #[error("class '{name}' is not part of the working set")]
    UnknownClass { name: String },
}
