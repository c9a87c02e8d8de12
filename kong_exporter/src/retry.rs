//! Bounded-retry construction helper.
//!
//! Used once at startup to build the status client. Retry policy never
//! applies inside the scrape path; a scrape that fails simply reports the
//! upstream as down. Exhausting the construction retries is fatal to the
//! process, on the rationale that serving with a client that has never
//! reached its upstream provides no value.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Run `build` until it succeeds or `retries` additional attempts are
/// exhausted, sleeping `delay` between attempts.
///
/// Makes `retries + 1` attempts in total and returns the final attempt's
/// error on exhaustion.
///
/// # Errors
///
/// Returns the error of the last attempt once all retries are used up.
pub fn with_retries<T, E, F>(retries: u32, delay: Duration, mut build: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match build() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!("construction attempt failed, retrying in {delay:?}: {err}");
                thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}
