pub mod fetcher;
pub mod fingerprint;
pub mod session;

// Re-export common types
pub use fetcher::{FetchError, FetchedPage, PageFetcher, WebDriverFetcher};
pub use fingerprint::FingerprintManager;
pub use session::BrowserSession;
