//! Identity plumbing: account lookup and signed bearer tokens.
//!
//! Tokens are `base64url(claims).base64url(hmac_sha256(claims))` signed with
//! a process-wide key. The format is an implementation detail; the contract
//! is only that a verified token yields the caller's id, name and role.

use anyhow::Context;
use base64::Engine;
use hmac::{Hmac, Mac};
use once_cell::sync::OnceCell;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{Actor, Role};

static HMAC_KEY: OnceCell<[u8; 32]> = OnceCell::new();

/// Install the signing key, from `SHADOWMAR_HMAC_KEY` (hex) when set or a
/// random per-process key otherwise. Random keys invalidate tokens across
/// restarts, which is acceptable for a single-campaign server.
pub fn init_key() {
    let key = std::env::var("SHADOWMAR_HMAC_KEY")
        .ok()
        .and_then(|h| hex::decode(h).ok())
        .and_then(|v| v.try_into().ok())
        .unwrap_or_else(|| {
            let mut kb = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut kb);
            kb
        });
    HMAC_KEY.set(key).ok();
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    name: String,
    role: Role,
    iat: i64,
}

pub fn issue_token(actor: &Actor) -> anyhow::Result<String> {
    let claims = Claims {
        sub: actor.user_id,
        name: actor.username.clone(),
        role: actor.role,
        iat: OffsetDateTime::now_utc().unix_timestamp(),
    };
    let payload = serde_json::to_vec(&claims)?;
    let part1 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&payload);
    let sig = hmac_sha256(&payload)?;
    let part2 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(sig);
    Ok(format!("{}.{}", part1, part2))
}

pub fn verify_token(token: &str) -> anyhow::Result<Actor> {
    let mut parts = token.split('.');
    let p1 = parts.next().context("missing payload")?;
    let p2 = parts.next().context("missing signature")?;
    if parts.next().is_some() {
        anyhow::bail!("too many parts");
    }
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(p1)?;
    let sig = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(p2)?;
    let expected = hmac_sha256(&payload)?;
    if sig != expected {
        anyhow::bail!("bad signature");
    }
    let claims: Claims = serde_json::from_slice(&payload)?;
    Ok(Actor { user_id: claims.sub, username: claims.name, role: claims.role })
}

fn hmac_sha256(data: &[u8]) -> anyhow::Result<[u8; 32]> {
    type HmacSha256 = Hmac<Sha256>;
    let key = HMAC_KEY.get().context("hmac key missing")?;
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn password_digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

#[derive(Clone)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    digest: [u8; 32],
}

impl Account {
    pub fn actor(&self) -> Actor {
        Actor { user_id: self.id, username: self.username.clone(), role: self.role }
    }
}

/// Configured campaign accounts. A real deployment would back this with a
/// user table; one DM and one shared player login cover a single campaign.
pub struct Accounts {
    users: Vec<Account>,
}

impl Accounts {
    pub fn new(logins: &[(&str, &str, Role)]) -> Self {
        let users = logins
            .iter()
            .map(|(username, password, role)| Account {
                id: Uuid::new_v4(),
                username: username.to_string(),
                role: *role,
                digest: password_digest(password),
            })
            .collect();
        Self { users }
    }

    pub fn verify(&self, username: &str, password: &str) -> Option<&Account> {
        self.users
            .iter()
            .find(|a| a.username == username && a.digest == password_digest(password))
    }

    pub fn by_username(&self, username: &str) -> Option<&Account> {
        self.users.iter().find(|a| a.username == username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_preserves_identity() {
        init_key();
        let actor = Actor {
            user_id: Uuid::new_v4(),
            username: "dm".into(),
            role: Role::Dm,
        };
        let token = issue_token(&actor).unwrap();
        let back = verify_token(&token).unwrap();
        assert_eq!(back.user_id, actor.user_id);
        assert_eq!(back.username, "dm");
        assert!(back.is_dm());
    }

    #[test]
    fn tampered_token_is_rejected() {
        init_key();
        let actor = Actor {
            user_id: Uuid::new_v4(),
            username: "player".into(),
            role: Role::Player,
        };
        let token = issue_token(&actor).unwrap();
        let forged = format!("{token}x");
        assert!(verify_token(&forged).is_err());
        assert!(verify_token("not.a.token").is_err());
        assert!(verify_token("missing-parts").is_err());
    }

    #[test]
    fn account_login_checks_password() {
        let accounts = Accounts::new(&[("dm", "secret", Role::Dm)]);
        assert!(accounts.verify("dm", "secret").is_some());
        assert!(accounts.verify("dm", "wrong").is_none());
        assert!(accounts.verify("ghost", "secret").is_none());
    }
}
