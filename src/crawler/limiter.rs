use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

/// Global dispatch rate limiter shared by every crawl lane.
///
/// Fixed-window token bucket: at most `max_per_window` dispatches per
/// `window`. Serialized through a mutex so concurrent workers never
/// double-spend a token.
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    window_start: Instant,
    used: usize,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Take a token, waiting for the next window if the current one is spent
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if now.duration_since(state.window_start) >= self.window {
                    state.window_start = now;
                    state.used = 0;
                }

                if state.used < self.max_per_window {
                    state.used += 1;
                    return;
                }

                state.window_start + self.window
            };

            sleep_until(wait_until).await;
        }
    }

    /// Take a token only if one is immediately available
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.used = 0;
        }

        if state.used < self.max_per_window {
            state.used += 1;
            true
        } else {
            false
        }
    }
}
