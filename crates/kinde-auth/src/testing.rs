//! Test fixtures: a fixed RS256 signing key with its JWKS document and
//! signer, plus an in-memory `AccountApi`. Enabled for this crate's tests
//! and, through the `test-util` feature, for downstream crates.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use kinde_api::{
    AccountApi, ApiError, ApiFeatureFlag, ApiFuture, EntitlementsPage, PermissionSet, RoleRecord,
    UserProfile,
};
use serde_json::{Value, json};

/// `kid` of the fixture key.
pub const TEST_KID: &str = "kinde-test-key";

const PRIVATE_KEY_PEM: &str = include_str!("../testdata/rsa_private.pem");

const MODULUS: &str = "p7xQkul8muSxYss1L6G6Lw-q6AtQDVEwtBZ5SibDlWAiKJy1nocvFXwqNyr-asxLJbNP6jG_O8PxWGi7xc2N1uK7gUnr9a2cxjmU9Vf3QlBEozxjsfLXWsXTx3dzdyf-pp29Wkm6bOM1j5Q2ppdU96Ctb9XjhRd9LH18NakkAnfpCUSVHVhybckTj1JTCy1jVra0203cvxB3IGNY2PWFUcplMyfdprmp1vBacbwVddo8BZE_XbKg-GjAd10VVoG6c9OUb3qvXNHcLWqU6oh8GOcGUWfkPC6w9XN27oVwdt1FNCFJHY6vQ0a1QSbuup7-3IyKIszlTs8vLUruKsqu3Q";

/// JWKS document publishing the fixture key.
pub fn jwks_json() -> Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": TEST_KID,
            "n": MODULUS,
            "e": "AQAB"
        }]
    })
}

/// Sign `claims` with the fixture key.
///
/// Panics on a malformed fixture; only ever called from tests.
pub fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_KID.to_owned());
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY_PEM.as_bytes())
        .expect("fixture RSA key should parse");
    jsonwebtoken::encode(&header, claims, &key).expect("fixture claims should sign")
}

/// Sign `claims` with an `exp` one hour out.
pub fn sign_fresh(mut claims: Value) -> String {
    if let Some(map) = claims.as_object_mut() {
        map.entry("exp")
            .or_insert_with(|| json!(crate::clock::unix_secs() + 3600));
    }
    sign(&claims)
}

/// In-memory account API that counts calls and records entitlement cursors.
///
/// Entitlement pages are served in order, one per call. With `failing` set,
/// every call returns a 500.
#[derive(Default)]
pub struct FakeAccountApi {
    pub flags: HashMap<String, ApiFeatureFlag>,
    pub permissions: PermissionSet,
    pub roles: Vec<RoleRecord>,
    pub pages: Vec<EntitlementsPage>,
    pub profile: UserProfile,
    pub failing: bool,
    pub log: CallLog,
}

/// Calls observed by a `FakeAccountApi`.
#[derive(Default)]
pub struct CallLog {
    calls: AtomicUsize,
    entitlement_calls: AtomicUsize,
    cursors: Mutex<Vec<Option<String>>>,
}

impl FakeAccountApi {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// Total calls across all endpoints.
    pub fn calls(&self) -> usize {
        self.log.calls.load(Ordering::SeqCst)
    }

    pub fn entitlement_calls(&self) -> usize {
        self.log.entitlement_calls.load(Ordering::SeqCst)
    }

    /// `starting_after` values received, in call order.
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.log
            .cursors
            .lock()
            .map(|cursors| cursors.clone())
            .unwrap_or_default()
    }

    fn respond<T: Clone>(&self, value: &T) -> kinde_api::Result<T> {
        self.log.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(ApiError::Status {
                status: 500,
                body: "upstream unavailable".into(),
            });
        }
        Ok(value.clone())
    }
}

impl AccountApi for FakeAccountApi {
    fn feature_flags<'a>(
        &'a self,
        _access_token: &'a str,
    ) -> ApiFuture<'a, HashMap<String, ApiFeatureFlag>> {
        let result = self.respond(&self.flags);
        Box::pin(async move { result })
    }

    fn permissions<'a>(&'a self, _access_token: &'a str) -> ApiFuture<'a, PermissionSet> {
        let result = self.respond(&self.permissions);
        Box::pin(async move { result })
    }

    fn roles<'a>(&'a self, _access_token: &'a str) -> ApiFuture<'a, Vec<RoleRecord>> {
        let result = self.respond(&self.roles);
        Box::pin(async move { result })
    }

    fn entitlements<'a>(
        &'a self,
        _access_token: &'a str,
        starting_after: Option<&'a str>,
        _page_size: Option<u32>,
    ) -> ApiFuture<'a, EntitlementsPage> {
        let index = self.log.entitlement_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cursors) = self.log.cursors.lock() {
            cursors.push(starting_after.map(str::to_owned));
        }
        let page = self.pages.get(index).cloned().unwrap_or_default();
        let result = self.respond(&page);
        Box::pin(async move { result })
    }

    fn user_profile<'a>(&'a self, _access_token: &'a str) -> ApiFuture<'a, UserProfile> {
        let result = self.respond(&self.profile);
        Box::pin(async move { result })
    }
}
