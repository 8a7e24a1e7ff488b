//! Session ticket protection keyed by operator-supplied seeds.
//!
//! Every seed is stretched with HKDF-SHA256 into a ticket key name and a
//! ChaCha20-Poly1305 key. A ticket is laid out as
//! `key name (16) || nonce (12) || ciphertext`, with the key name also
//! authenticated as associated data. Servers sharing a seed set can resume
//! each other's sessions.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rustls::server::ProducesTickets;
use sha2::Sha256;

use crate::config::schema::TicketSeedSet;
use crate::observability::metrics;
use crate::tls::TlsError;

const KEY_NAME_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HKDF_SALT: &[u8] = b"edge-frontend session ticket seed";

struct TicketKey {
    name: [u8; KEY_NAME_LEN],
    cipher: ChaCha20Poly1305,
}

impl TicketKey {
    fn derive(seed_hex: &str) -> Result<Self, TlsError> {
        let seed = hex::decode(seed_hex)?;
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &seed);

        let mut name = [0u8; KEY_NAME_LEN];
        let mut key = [0u8; 32];
        hk.expand(b"ticket key name", &mut name)
            .map_err(|_| TlsError::KeyDerivation)?;
        hk.expand(b"ticket encryption key", &mut key)
            .map_err(|_| TlsError::KeyDerivation)?;

        Ok(Self {
            name,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }
}

/// Ticket producer backed by a [`TicketSeedSet`].
pub struct SeedTicketer {
    /// `keys[0]` seals new tickets; all of them open old ones, in order.
    keys: Vec<TicketKey>,
    lifetime: u32,
}

impl SeedTicketer {
    /// Derive keys for every current seed and the `generations` most recent
    /// previous seeds.
    pub fn new(seeds: &TicketSeedSet, generations: usize, lifetime: u32) -> Result<Self, TlsError> {
        if seeds.current.is_empty() {
            return Err(TlsError::NoCurrentSeed);
        }

        let keys = seeds
            .current
            .iter()
            .chain(seeds.previous.iter().take(generations))
            .map(|seed| TicketKey::derive(seed))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { keys, lifetime })
    }

    /// A seed set holding one random seed, for endpoints configured without
    /// seeds. Tickets then only survive as long as the process.
    pub fn ephemeral_seeds() -> TicketSeedSet {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        TicketSeedSet::new(vec![hex::encode(seed)])
    }
}

impl fmt::Debug for SeedTicketer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedTicketer")
            .field(
                "key_names",
                &self
                    .keys
                    .iter()
                    .map(|k| hex::encode(k.name))
                    .collect::<Vec<_>>(),
            )
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl ProducesTickets for SeedTicketer {
    fn enabled(&self) -> bool {
        true
    }

    fn lifetime(&self) -> u32 {
        self.lifetime
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        let key = self.keys.first()?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = key
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plain,
                    aad: &key.name,
                },
            )
            .ok()?;

        let mut ticket = Vec::with_capacity(KEY_NAME_LEN + NONCE_LEN + sealed.len());
        ticket.extend_from_slice(&key.name);
        ticket.extend_from_slice(&nonce);
        ticket.extend_from_slice(&sealed);
        Some(ticket)
    }

    fn decrypt(&self, ticket: &[u8]) -> Option<Vec<u8>> {
        if ticket.len() < KEY_NAME_LEN + NONCE_LEN {
            return None;
        }
        let (name, rest) = ticket.split_at(KEY_NAME_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let Some(key) = self.keys.iter().find(|k| k.name[..] == *name) else {
            tracing::debug!(
                key_name = %hex::encode(name),
                "Session ticket sealed under an unknown seed, falling back to full handshake"
            );
            metrics::record_ticket_decrypt_miss();
            return None;
        };

        key.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: name,
                },
            )
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds(current: &[&str], previous: &[&str]) -> TicketSeedSet {
        TicketSeedSet::new(current.iter().map(|s| hex::encode(s)).collect())
            .with_previous(previous.iter().map(|s| hex::encode(s)).collect())
    }

    #[test]
    fn test_ticket_opens_under_same_seeds() {
        let ticketer = SeedTicketer::new(&seeds(&["hello"], &[]), 1, 3600).unwrap();
        let ticket = ticketer.encrypt(b"session state").unwrap();

        assert_eq!(ticket.len(), KEY_NAME_LEN + NONCE_LEN + 13 + 16);
        assert_eq!(ticketer.decrypt(&ticket).unwrap(), b"session state");
        assert_eq!(ticketer.lifetime(), 3600);
    }

    #[test]
    fn test_servers_sharing_seeds_share_tickets() {
        let a = SeedTicketer::new(&seeds(&["hello"], &[]), 1, 3600).unwrap();
        let b = SeedTicketer::new(&seeds(&["hello"], &[]), 1, 3600).unwrap();
        let ticket = a.encrypt(b"state").unwrap();
        assert_eq!(b.decrypt(&ticket).unwrap(), b"state");
    }

    #[test]
    fn test_rotated_seed_invalidates_old_tickets() {
        let old = SeedTicketer::new(&seeds(&["hello"], &[]), 1, 3600).unwrap();
        let ticket = old.encrypt(b"state").unwrap();

        let rotated = SeedTicketer::new(&seeds(&["goodbyte"], &[]), 1, 3600).unwrap();
        assert!(rotated.decrypt(&ticket).is_none());
    }

    #[test]
    fn test_previous_seed_still_opens_tickets() {
        let old = SeedTicketer::new(&seeds(&["hello"], &[]), 1, 3600).unwrap();
        let ticket = old.encrypt(b"state").unwrap();

        let rotated = SeedTicketer::new(&seeds(&["goodbyte"], &["hello"]), 1, 3600).unwrap();
        assert_eq!(rotated.decrypt(&ticket).unwrap(), b"state");

        // New tickets are sealed under the current seed only.
        let fresh = rotated.encrypt(b"fresh").unwrap();
        assert!(old.decrypt(&fresh).is_none());
    }

    #[test]
    fn test_generation_cap() {
        let oldest = SeedTicketer::new(&seeds(&["one"], &[]), 1, 3600).unwrap();
        let ticket = oldest.encrypt(b"state").unwrap();

        let capped = SeedTicketer::new(&seeds(&["three"], &["two", "one"]), 1, 3600).unwrap();
        assert!(capped.decrypt(&ticket).is_none());

        let wide = SeedTicketer::new(&seeds(&["three"], &["two", "one"]), 2, 3600).unwrap();
        assert!(wide.decrypt(&ticket).is_some());

        let none = SeedTicketer::new(&seeds(&["three"], &["one"]), 0, 3600).unwrap();
        assert!(none.decrypt(&ticket).is_none());
    }

    #[test]
    fn test_tampered_and_short_tickets() {
        let ticketer = SeedTicketer::new(&seeds(&["hello"], &[]), 1, 3600).unwrap();
        let mut ticket = ticketer.encrypt(b"state").unwrap();
        let last = ticket.len() - 1;
        ticket[last] ^= 0xff;

        assert!(ticketer.decrypt(&ticket).is_none());
        assert!(ticketer.decrypt(&[0u8; 8]).is_none());
    }

    #[test]
    fn test_invalid_seeds() {
        let bad = TicketSeedSet::new(vec!["not hex".into()]);
        assert!(matches!(
            SeedTicketer::new(&bad, 1, 3600),
            Err(TlsError::InvalidSeed(_))
        ));
        assert!(matches!(
            SeedTicketer::new(&TicketSeedSet::default(), 1, 3600),
            Err(TlsError::NoCurrentSeed)
        ));
    }

    #[test]
    fn test_ephemeral_seeds_are_unique() {
        let a = SeedTicketer::ephemeral_seeds();
        let b = SeedTicketer::ephemeral_seeds();
        assert_eq!(a.current.len(), 1);
        assert_ne!(a, b);
    }
}
