//! Limiter driven by the rate limit the API reports through
//! `X-RateLimit-*` response headers.
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

use super::limiter::round_up_to_second;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiLimiter {
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
    pub reset_after: f64,
    pub bucket: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApiLimiter {
    fn is_set(&self) -> bool {
        self.updated_at.is_some()
    }

    /// The limit is exceeded when no requests remain and the reset lies in
    /// the future.
    pub fn limit_exceeded(&self, now: DateTime<Utc>) -> bool {
        if !self.is_set() || self.remaining > 0 {
            return false;
        }
        match self.reset_at {
            Some(at) => at > now,
            None => false,
        }
    }

    /// How long to wait for the reported reset, rounded up to the second.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        match self.reset_at {
            Some(at) if at > now => round_up_to_second(at - now),
            _ => Duration::ZERO,
        }
    }

    /// Updates the limiter from response headers. The remaining budget is
    /// decremented for the request just made; when the headers identify a
    /// new `(bucket, reset_at)` pair the whole state is replaced.
    pub fn update_from_headers(
        &mut self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if self.remaining > 0 {
            self.remaining -= 1;
        }
        let Some(parsed) = Self::from_headers(headers, now)? else {
            return Ok(());
        };
        if parsed.bucket == self.bucket && parsed.reset_at == self.reset_at {
            return Ok(());
        }
        *self = parsed;
        Ok(())
    }

    /// Parses the limiter state from headers. Returns `None` when any of
    /// the headers is absent; malformed values are errors.
    fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Result<Option<Self>, String> {
        let Some(limit) = header_str(headers, "X-RateLimit-Limit") else {
            return Ok(None);
        };
        let Some(remaining) = header_str(headers, "X-RateLimit-Remaining") else {
            return Ok(None);
        };
        let Some(reset) = header_str(headers, "X-RateLimit-Reset") else {
            return Ok(None);
        };
        let Some(reset_after) = header_str(headers, "X-RateLimit-Reset-After") else {
            return Ok(None);
        };
        let Some(bucket) = header_str(headers, "X-RateLimit-Bucket") else {
            return Ok(None);
        };
        let limit: i64 = limit
            .parse()
            .map_err(|e| format!("limit '{limit}': {e}"))?;
        let remaining: i64 = remaining
            .parse()
            .map_err(|e| format!("remaining '{remaining}': {e}"))?;
        let reset_epoch: f64 = reset.parse().map_err(|e| format!("reset '{reset}': {e}"))?;
        let reset_after: f64 = reset_after
            .parse()
            .map_err(|e| format!("reset-after '{reset_after}': {e}"))?;
        let reset_at = Utc
            .timestamp_opt(
                reset_epoch.trunc() as i64,
                (reset_epoch.fract() * 1e9) as u32,
            )
            .single()
            .ok_or_else(|| format!("reset '{reset}' out of range"))?;
        Ok(Some(Self {
            limit,
            remaining,
            reset_at: Some(reset_at),
            reset_after,
            bucket: bucket.to_string(),
            updated_at: Some(now),
        }))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
