use serde::{Deserialize, Serialize};

/// Minimum rendered body length below which a 2xx page is treated as a soft
/// content failure
pub const MIN_BODY_LENGTH: usize = 50;

/// Failure taxonomy for a fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Http,
    ClientScript,
    AntiBot,
    Content,
    Timeout,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Http => "http",
            ErrorCategory::ClientScript => "client_script",
            ErrorCategory::AntiBot => "anti_bot",
            ErrorCategory::Content => "content",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// Structured classification of a failed or suspicious fetch attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub is_blocking: bool,
    pub retry_with_alternate_egress: bool,
    pub message: String,
    /// Operator-facing hints; never drive control flow
    pub suggestions: Vec<String>,
}

/// Raw signals gathered during one fetch attempt
#[derive(Debug, Clone, Default)]
pub struct FailureSignals {
    /// Message of the error raised by navigation or extraction, if any
    pub error: Option<String>,
    /// HTTP status of the main document response, if one was observed
    pub http_status: Option<u16>,
    /// Client-side script errors raised while the page loaded
    pub script_errors: Vec<String>,
    /// URLs of sub-resource requests that failed
    pub failed_requests: Vec<String>,
    /// Rendered page title
    pub title: String,
    /// Rendered body text
    pub body_text: String,
}

impl FailureSignals {
    fn status_ok(&self) -> bool {
        matches!(self.http_status, Some(s) if (200..300).contains(&s))
    }
}

/// What the content heuristic found on an otherwise loaded page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSignal {
    /// Title carries a hard error phrase; egress retry only helps when an
    /// anti-bot phrase co-occurs
    HardError { anti_bot_cooccurs: bool, phrase: String },
    /// Title or body carries an anti-bot challenge phrase
    AntiBot { phrase: String },
    /// Body text too short to be a real page
    ThinBody { length: usize },
}

const NETWORK_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "dns",
    "name not resolved",
    "net::err",
    "unreachable",
    "tls",
    "certificate",
];

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "deadline exceeded"];

const ANTI_BOT_ERROR_KEYWORDS: &[&str] =
    &["captcha", "blocked", "forbidden", "rate limit", "rate-limit", "suspicious"];

const HARD_ERROR_PHRASES: &[&str] = &[
    "page not found",
    "404 not found",
    "service unavailable",
    "internal server error",
    "bad gateway",
    "temporarily unavailable",
];

const ANTI_BOT_PHRASES: &[&str] = &[
    "captcha",
    "checking your browser",
    "cloudflare",
    "are you a robot",
    "access denied",
    "unusual traffic",
    "verify you are human",
];

/// Script error patterns that pages throw routinely without affecting the
/// content we extract
const HARMLESS_SCRIPT_PATTERNS: &[&str] = &[
    "cannot read property",
    "cannot read properties of undefined",
    "cannot read properties of null",
    "is not defined",
    "undefined is not",
    "null is not an object",
];

/// Sub-resource hosts whose failures never affect page content
const TRACKER_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "facebook.net",
    "facebook.com/tr",
    "segment.io",
    "mixpanel.com",
    "hotjar.com",
    "analytics",
];

fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

fn find_match<'a>(haystack: &str, patterns: &'a [&'a str]) -> Option<&'a str> {
    let lower = haystack.to_lowercase();
    patterns.iter().find(|p| lower.contains(*p)).copied()
}

/// Inspect the rendered page for soft failures a 2xx response can hide.
///
/// Runs independent of any thrown error: a page can return 200 and still be
/// an error interstitial, a bot challenge, or an empty shell.
pub fn content_signal(title: &str, body_text: &str) -> Option<ContentSignal> {
    if let Some(phrase) = find_match(title, HARD_ERROR_PHRASES) {
        let anti_bot_cooccurs =
            matches_any(title, ANTI_BOT_PHRASES) || matches_any(body_text, ANTI_BOT_PHRASES);
        return Some(ContentSignal::HardError {
            anti_bot_cooccurs,
            phrase: phrase.to_string(),
        });
    }

    if let Some(phrase) =
        find_match(title, ANTI_BOT_PHRASES).or_else(|| find_match(body_text, ANTI_BOT_PHRASES))
    {
        return Some(ContentSignal::AntiBot { phrase: phrase.to_string() });
    }

    let length = body_text.trim().len();
    if length < MIN_BODY_LENGTH {
        return Some(ContentSignal::ThinBody { length });
    }

    None
}

/// Classify a failed or suspicious attempt and advise on retry.
///
/// Categorization precedence (first match wins): network pattern, timeout
/// pattern, HTTP status >= 400, client-script errors, content signal,
/// anti-bot keyword in the error message, unknown. Severity and blocking
/// follow the per-category table below; a successful status defaults to
/// warning/non-blocking unless the content heuristic disagrees.
pub fn classify(signals: &FailureSignals) -> ErrorAnalysis {
    let error_text = signals.error.as_deref().unwrap_or("");

    if !error_text.is_empty() && matches_any(error_text, NETWORK_PATTERNS) {
        return classify_network(signals, error_text);
    }

    if !error_text.is_empty() && matches_any(error_text, TIMEOUT_PATTERNS) {
        return ErrorAnalysis {
            category: ErrorCategory::Timeout,
            // Blocking by default, demoted from critical because the stall is
            // plausibly address-based and a different egress may get through
            severity: Severity::Warning,
            is_blocking: true,
            retry_with_alternate_egress: true,
            message: format!("Navigation timed out: {}", error_text),
            suggestions: vec![
                "Retry through a different egress point".to_string(),
                "Increase the navigation timeout for slow sites".to_string(),
            ],
        };
    }

    if let Some(status) = signals.http_status.filter(|s| *s >= 400) {
        return classify_http(status);
    }

    if !signals.script_errors.is_empty() {
        return classify_scripts(signals);
    }

    if let Some(signal) = content_signal(&signals.title, &signals.body_text) {
        return classify_content(signal);
    }

    if !error_text.is_empty() && matches_any(error_text, ANTI_BOT_ERROR_KEYWORDS) {
        return ErrorAnalysis {
            category: ErrorCategory::AntiBot,
            severity: Severity::Warning,
            is_blocking: true,
            retry_with_alternate_egress: true,
            message: format!("Anti-bot detection: {}", error_text),
            suggestions: vec![
                "Rotate egress point and browser fingerprint".to_string(),
                "Slow down the crawl rate for this site".to_string(),
            ],
        };
    }

    let blocking = !signals.status_ok() || signals.error.is_some();
    ErrorAnalysis {
        category: ErrorCategory::Unknown,
        severity: if blocking { Severity::Critical } else { Severity::Warning },
        is_blocking: blocking,
        retry_with_alternate_egress: false,
        message: if error_text.is_empty() {
            "Unclassified failure".to_string()
        } else {
            error_text.to_string()
        },
        suggestions: vec!["Inspect the page manually to find the failure mode".to_string()],
    }
}

fn classify_network(signals: &FailureSignals, error_text: &str) -> ErrorAnalysis {
    // Failures confined to analytics/tracking sub-requests do not affect
    // extraction
    let trackers_only = !signals.failed_requests.is_empty()
        && signals
            .failed_requests
            .iter()
            .all(|url| matches_any(url, TRACKER_DOMAINS));

    if trackers_only {
        return ErrorAnalysis {
            category: ErrorCategory::Network,
            severity: Severity::Info,
            is_blocking: false,
            retry_with_alternate_egress: true,
            message: format!("Tracker sub-requests failed: {}", error_text),
            suggestions: vec!["No action needed; only tracking domains failed".to_string()],
        };
    }

    ErrorAnalysis {
        category: ErrorCategory::Network,
        severity: Severity::Critical,
        is_blocking: true,
        retry_with_alternate_egress: true,
        message: format!("Network failure: {}", error_text),
        suggestions: vec![
            "Retry through a different egress point".to_string(),
            "Check connectivity from the crawler host".to_string(),
        ],
    }
}

fn classify_http(status: u16) -> ErrorAnalysis {
    let retry = matches!(status, 403 | 429 | 503);
    let severity = match (status, retry) {
        // Egress-retryable statuses are plausibly address-based, demote
        (_, true) => Severity::Warning,
        (s, _) if s >= 500 => Severity::Critical,
        _ => Severity::Warning,
    };

    let suggestions = match status {
        403 | 429 => vec![
            "Rotate egress point; the current address is likely rate-limited".to_string(),
            "Reduce the dispatch rate for this site".to_string(),
        ],
        404 => vec!["Verify the URL still exists; remove it from the crawl if not".to_string()],
        s if s >= 500 => vec!["The site is failing; retry the crawl later".to_string()],
        _ => vec![],
    };

    ErrorAnalysis {
        category: ErrorCategory::Http,
        severity,
        is_blocking: true,
        retry_with_alternate_egress: retry,
        message: format!("HTTP status {}", status),
        suggestions,
    }
}

fn classify_scripts(signals: &FailureSignals) -> ErrorAnalysis {
    let all_harmless = signals
        .script_errors
        .iter()
        .all(|e| matches_any(e, HARMLESS_SCRIPT_PATTERNS));

    if all_harmless {
        return ErrorAnalysis {
            category: ErrorCategory::ClientScript,
            severity: Severity::Info,
            is_blocking: false,
            retry_with_alternate_egress: false,
            message: format!(
                "{} harmless script error(s) during page load",
                signals.script_errors.len()
            ),
            suggestions: vec![],
        };
    }

    ErrorAnalysis {
        category: ErrorCategory::ClientScript,
        severity: Severity::Warning,
        is_blocking: !signals.status_ok(),
        retry_with_alternate_egress: false,
        message: format!(
            "Script errors during page load: {}",
            signals.script_errors.join("; ")
        ),
        suggestions: vec!["Check whether the page renders without JavaScript".to_string()],
    }
}

fn classify_content(signal: ContentSignal) -> ErrorAnalysis {
    match signal {
        ContentSignal::HardError { anti_bot_cooccurs, phrase } => ErrorAnalysis {
            category: ErrorCategory::Content,
            severity: Severity::Critical,
            is_blocking: true,
            retry_with_alternate_egress: anti_bot_cooccurs,
            message: format!("Page title reports an error: '{}'", phrase),
            suggestions: vec!["Confirm the URL serves real content".to_string()],
        },
        ContentSignal::AntiBot { phrase } => ErrorAnalysis {
            category: ErrorCategory::AntiBot,
            severity: Severity::Critical,
            is_blocking: true,
            retry_with_alternate_egress: true,
            message: format!("Anti-bot challenge detected: '{}'", phrase),
            suggestions: vec![
                "Rotate egress point and browser fingerprint".to_string(),
                "Slow down the crawl rate for this site".to_string(),
            ],
        },
        ContentSignal::ThinBody { length } => ErrorAnalysis {
            category: ErrorCategory::Content,
            severity: Severity::Warning,
            is_blocking: false,
            retry_with_alternate_egress: false,
            message: format!(
                "Body text is only {} characters; page may be an empty shell",
                length
            ),
            suggestions: vec!["Check whether the page requires interaction to render".to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals_with_error(error: &str) -> FailureSignals {
        FailureSignals {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    fn signals_with_status(status: u16) -> FailureSignals {
        FailureSignals {
            http_status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn test_network_error_retryable() {
        let analysis = classify(&signals_with_error("connection refused by peer"));
        assert_eq!(analysis.category, ErrorCategory::Network);
        assert!(analysis.is_blocking);
        assert!(analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_tracker_only_network_failure_non_blocking() {
        let mut signals = signals_with_error("net::err_connection_refused");
        signals.http_status = Some(200);
        signals.failed_requests = vec![
            "https://www.google-analytics.com/collect".to_string(),
            "https://static.hotjar.com/c.js".to_string(),
        ];
        signals.body_text = "a".repeat(200);

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::Network);
        assert!(!analysis.is_blocking);
        assert_eq!(analysis.severity, Severity::Info);
    }

    #[test]
    fn test_timeout_is_blocking_and_retryable() {
        let analysis = classify(&signals_with_error("page load timed out after 30s"));
        assert_eq!(analysis.category, ErrorCategory::Timeout);
        assert!(analysis.is_blocking);
        assert!(analysis.retry_with_alternate_egress);
        // Demoted from critical because an egress switch may resolve it
        assert_eq!(analysis.severity, Severity::Warning);
    }

    #[test]
    fn test_retryable_http_statuses() {
        for status in [403u16, 429, 503] {
            let analysis = classify(&signals_with_status(status));
            assert_eq!(analysis.category, ErrorCategory::Http);
            assert!(
                analysis.retry_with_alternate_egress,
                "status {} should be egress-retryable",
                status
            );
            assert_eq!(analysis.severity, Severity::Warning);
        }
    }

    #[test]
    fn test_404_not_retryable() {
        let analysis = classify(&signals_with_status(404));
        assert_eq!(analysis.category, ErrorCategory::Http);
        assert!(analysis.is_blocking);
        assert!(!analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_500_critical() {
        let analysis = classify(&signals_with_status(500));
        assert_eq!(analysis.severity, Severity::Critical);
        assert!(!analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_harmless_script_errors_are_info() {
        let signals = FailureSignals {
            http_status: Some(200),
            script_errors: vec![
                "TypeError: cannot read properties of undefined (reading 'width')".to_string(),
                "ReferenceError: ga is not defined".to_string(),
            ],
            body_text: "a".repeat(200),
            ..Default::default()
        };

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::ClientScript);
        assert_eq!(analysis.severity, Severity::Info);
        assert!(!analysis.is_blocking);
    }

    #[test]
    fn test_unrecognized_script_error_is_warning() {
        let signals = FailureSignals {
            http_status: Some(200),
            script_errors: vec!["SyntaxError: unexpected token in app.js".to_string()],
            body_text: "a".repeat(200),
            ..Default::default()
        };

        let analysis = classify(&signals);
        assert_eq!(analysis.severity, Severity::Warning);
        assert!(!analysis.is_blocking);
    }

    #[test]
    fn test_thin_body_on_success_is_soft_content_failure() {
        let signals = FailureSignals {
            http_status: Some(200),
            title: "Home".to_string(),
            body_text: "loading...".to_string(),
            ..Default::default()
        };

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::Content);
        assert_eq!(analysis.severity, Severity::Warning);
        assert!(!analysis.is_blocking);
        assert!(!analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_anti_bot_phrase_in_body() {
        let signals = FailureSignals {
            http_status: Some(200),
            title: "Just a moment".to_string(),
            body_text: format!("Checking your browser before accessing. {}", "x".repeat(100)),
            ..Default::default()
        };

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::AntiBot);
        assert_eq!(analysis.severity, Severity::Critical);
        assert!(analysis.is_blocking);
        assert!(analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_hard_error_title_without_anti_bot() {
        let signals = FailureSignals {
            http_status: Some(200),
            title: "Page Not Found".to_string(),
            body_text: "x".repeat(100),
            ..Default::default()
        };

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::Content);
        assert!(analysis.is_blocking);
        assert!(!analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_hard_error_title_with_anti_bot_cooccurrence() {
        let signals = FailureSignals {
            http_status: Some(200),
            title: "Service Unavailable".to_string(),
            body_text: format!("Your access was blocked by captcha. {}", "x".repeat(100)),
            ..Default::default()
        };

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::Content);
        assert!(analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_anti_bot_keyword_in_error_message() {
        let mut signals = signals_with_error("request blocked due to suspicious activity");
        signals.body_text = "x".repeat(100);

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::AntiBot);
        assert!(analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_unknown_error_not_retryable() {
        let mut signals = signals_with_error("something odd happened");
        signals.body_text = "x".repeat(100);

        let analysis = classify(&signals);
        assert_eq!(analysis.category, ErrorCategory::Unknown);
        assert!(!analysis.retry_with_alternate_egress);
    }

    #[test]
    fn test_content_signal_precedence() {
        // Hard error outranks thin body
        let signal = content_signal("Page not found", "short").unwrap();
        assert!(matches!(signal, ContentSignal::HardError { .. }));

        let signal = content_signal("Fine title", "short").unwrap();
        assert!(matches!(signal, ContentSignal::ThinBody { .. }));

        assert!(content_signal("Fine title", &"x".repeat(100)).is_none());
    }
}
