use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::AppState;
use super::errors::too_many_requests_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: usize,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct QuotaWindow {
    opened_at: Instant,
    used: usize,
}

type QuotaWindows = HashMap<ClientIdentity, QuotaWindow>;

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<QuotaWindows>>,
    policy: RateLimitPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Admitted,
    Rejected { retry_after_seconds: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ClientIdentity {
    Ip(IpAddr),
    Anonymous,
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "ip:{ip}"),
            Self::Anonymous => f.write_str("anonymous"),
        }
    }
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn spawn_pruner(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                limiter.prune_closed_windows(Instant::now());
            }
        })
    }

    fn admit(&self, client: &ClientIdentity, now: Instant) -> Admission {
        let window_len = self.policy.window;
        let mut windows = self.lock_windows();
        let window = windows.entry(client.clone()).or_insert(QuotaWindow {
            opened_at: now,
            used: 0,
        });

        let elapsed = now.saturating_duration_since(window.opened_at);
        if elapsed >= window_len {
            *window = QuotaWindow {
                opened_at: now,
                used: 0,
            };
        }

        if window.used >= self.policy.max_requests {
            let remaining = window_len.saturating_sub(now.saturating_duration_since(window.opened_at));
            return Admission::Rejected {
                retry_after_seconds: remaining.as_secs().max(1),
            };
        }

        window.used += 1;
        Admission::Admitted
    }

    fn prune_closed_windows(&self, now: Instant) {
        let window_len = self.policy.window;
        self.lock_windows()
            .retain(|_, window| now.saturating_duration_since(window.opened_at) < window_len);
    }

    fn lock_windows(&self) -> MutexGuard<'_, QuotaWindows> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(super) async fn generate_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip());
    let client = client_identity(peer_ip, req.headers(), &state.trusted_proxy_ips);

    match state.rate_limiter.admit(&client, Instant::now()) {
        Admission::Admitted => next.run(req).await,
        Admission::Rejected {
            retry_after_seconds,
        } => {
            warn!(
                client = %client,
                route = %req.uri().path(),
                retry_after_seconds,
                "generation request rejected by rate limit"
            );
            too_many_requests_response(retry_after_seconds)
        }
    }
}

/// Forwarding headers are only believed when the socket peer is a trusted
/// proxy; the client is the right-most hop that is not one.
fn client_identity(
    peer_ip: Option<IpAddr>,
    headers: &HeaderMap,
    trusted_proxy_ips: &HashSet<IpAddr>,
) -> ClientIdentity {
    let Some(peer_ip) = peer_ip else {
        return ClientIdentity::Anonymous;
    };
    if !trusted_proxy_ips.contains(&peer_ip) {
        return ClientIdentity::Ip(peer_ip);
    }

    let mut hops: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();
    hops.push(peer_ip);

    let forwarded_client = hops
        .iter()
        .rev()
        .find(|hop| !trusted_proxy_ips.contains(hop))
        .copied();
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    };

    ClientIdentity::Ip(forwarded_client.or_else(real_ip).unwrap_or(peer_ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const WINDOW: Duration = Duration::from_secs(60);

    fn limiter(max_requests: usize) -> RateLimiter {
        RateLimiter::new(RateLimitPolicy {
            max_requests,
            window: WINDOW,
        })
    }

    fn client(last_octet: u8) -> ClientIdentity {
        ClientIdentity::Ip(IpAddr::from([203, 0, 113, last_octet]))
    }

    #[test]
    fn admits_up_to_quota_then_rejects_with_remaining_window() {
        let limiter = limiter(3);
        let start = Instant::now();

        for _ in 0..3 {
            assert_eq!(limiter.admit(&client(1), start), Admission::Admitted);
        }
        assert_eq!(
            limiter.admit(&client(1), start + Duration::from_secs(20)),
            Admission::Rejected {
                retry_after_seconds: 40
            }
        );
    }

    #[test]
    fn clients_are_charged_independently() {
        let limiter = limiter(1);
        let start = Instant::now();

        assert_eq!(limiter.admit(&client(1), start), Admission::Admitted);
        assert_eq!(limiter.admit(&client(2), start), Admission::Admitted);
        assert!(matches!(
            limiter.admit(&client(1), start),
            Admission::Rejected { .. }
        ));
    }

    #[test]
    fn quota_resets_when_the_window_closes() {
        let limiter = limiter(1);
        let start = Instant::now();

        assert_eq!(limiter.admit(&client(1), start), Admission::Admitted);
        assert!(matches!(
            limiter.admit(&client(1), start + Duration::from_secs(59)),
            Admission::Rejected {
                retry_after_seconds: 1
            }
        ));
        assert_eq!(
            limiter.admit(&client(1), start + WINDOW),
            Admission::Admitted
        );
    }

    #[test]
    fn pruning_drops_closed_windows_only() {
        let limiter = limiter(5);
        let start = Instant::now();

        limiter.admit(&client(1), start);
        limiter.admit(&client(2), start + Duration::from_secs(30));
        limiter.prune_closed_windows(start + Duration::from_secs(61));

        let windows = limiter.lock_windows();
        assert_eq!(windows.len(), 1);
        assert!(windows.contains_key(&client(2)));
    }

    #[test]
    fn untrusted_peers_cannot_spoof_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.99"));

        let identity = client_identity(
            Some(IpAddr::from([10, 20, 30, 40])),
            &headers,
            &HashSet::new(),
        );
        assert_eq!(identity, ClientIdentity::Ip(IpAddr::from([10, 20, 30, 40])));
    }

    #[test]
    fn trusted_proxy_chain_resolves_to_first_untrusted_hop() {
        let proxies = HashSet::from([IpAddr::from([10, 0, 0, 5]), IpAddr::from([10, 0, 0, 6])]);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.0.2.1, 198.51.100.20, 10.0.0.6"),
        );

        let identity = client_identity(Some(IpAddr::from([10, 0, 0, 5])), &headers, &proxies);
        assert_eq!(identity.to_string(), "ip:198.51.100.20");
    }

    #[test]
    fn requests_without_peer_address_share_the_anonymous_quota() {
        let identity = client_identity(None, &HeaderMap::new(), &HashSet::new());
        assert_eq!(identity, ClientIdentity::Anonymous);
        assert_eq!(identity.to_string(), "anonymous");
    }
}
