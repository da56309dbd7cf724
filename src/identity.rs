use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// One simulated user's identity for one session.
///
/// `user_id` is drawn from a bounded space, so the same user can be picked
/// by several sessions within a run; `client_id` is the per-user sequence
/// number that keeps those sessions distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: u32,
    pub client_id: u32,
}

impl UserIdentity {
    /// Credential value sent with every HTTP and stream request
    pub fn credentials(&self) -> Credentials {
        Credentials {
            user_id: self.user_id,
        }
    }

    /// Mint the correlation token for this identity's `seq`-th publish.
    /// Tokens are unique per session by construction.
    pub fn token(&self, seq: u64) -> String {
        format!("{}-{}-{}", self.user_id, self.client_id, seq)
    }
}

/// Identity-bearing credential with a defined wire serialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    user_id: u32,
}

impl Credentials {
    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    /// Cookie header value expected by the chat service
    pub fn cookie(&self) -> String {
        format!("userId={}", self.user_id)
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cookie())
    }
}

/// Shared table handing out per-user client ids for the run's duration.
///
/// Many sessions draw identities concurrently; the read-modify-write on the
/// counter table runs under one lock so two sessions can never compute the
/// same client id for the same user.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    used_ids: Mutex<HashMap<u32, u32>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a uniformly random user id from `[1, space]` and assign the
    /// next client id for it.
    pub fn next_identity(&self, space: u32) -> UserIdentity {
        let user_id = random_int_between(1, space as u64) as u32;

        let mut used_ids = self.used_ids.lock();
        let client_id = used_ids
            .entry(user_id)
            .and_modify(|last| *last += 1)
            .or_insert(1);

        UserIdentity {
            user_id,
            client_id: *client_id,
        }
    }
}

/// Uniform random integer in `[min, max]`, both included
pub fn random_int_between(min: u64, max: u64) -> u64 {
    rand::rng().random_range(min..=max)
}

/// Uniform random duration in `[min, max]`, both included
pub fn random_duration_between(min: Duration, max: Duration) -> Duration {
    Duration::from_millis(random_int_between(
        min.as_millis() as u64,
        max.as_millis() as u64,
    ))
}

/// Uniformly pick one slice element; `None` on an empty slice
pub fn random_item<T>(items: &[T]) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let index = random_int_between(0, items.len() as u64 - 1) as usize;
    items.get(index)
}
