pub mod billing;
pub mod persistence;
pub mod provider;

pub use billing::{BillingError, CheckoutVerifier, HttpCheckoutVerifier, VerifyOutcome};
pub use persistence::{AuthUser, HttpQueryStore, MemoryQueryStore, QueryStore, StoreError};
pub use provider::{
    GoogleSearchClient, ProviderError, ProviderItem, ProviderResponse, SearchInformation,
    SearchProvider,
};
