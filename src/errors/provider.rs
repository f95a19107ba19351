use alloc::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorKind {
    #[error("Provider {provider} imports unknown module {module}")]
    UnknownImport { provider: Arc<str>, module: Arc<str> },
    #[error(
        "\
        Provider {provider} declares {count} public constructors. \
        Dynamic registrations require the provider constructor to be generated\
        "
    )]
    PublicConstructorsInDynamicMode { provider: Arc<str>, count: usize },
}
