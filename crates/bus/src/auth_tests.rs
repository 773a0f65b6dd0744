// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ed25519_dalek::SigningKey;
use ph_auth::token::{sign_for_tests, RoutedClaims};
use ph_core::FakeClock;
use rand::rngs::OsRng;

struct Fixture {
    auth: BusAuth<FakeClock>,
    secrets: Arc<StaticProjectSecrets>,
    signing: SigningKey,
}

fn fixture() -> Fixture {
    let signing = SigningKey::generate(&mut OsRng);
    let keys = Arc::new(KeyStore::new());
    keys.install(signing.verifying_key());
    let secrets = Arc::new(StaticProjectSecrets::new());
    let auth = BusAuth {
        conat_password: "local-password".into(),
        host_id: Uuid::new_v4(),
        keys,
        secrets: secrets.clone(),
        clock: FakeClock::new(),
    };
    Fixture { auth, secrets, signing }
}

#[tokio::test]
async fn system_cookie_yields_hub() {
    let f = fixture();
    let material =
        AuthMaterial { system_cookie: Some("local-password".into()), ..Default::default() };
    assert_eq!(f.auth.sign_in(&material).await, Ok(AuthId::Hub));
}

#[tokio::test]
async fn wrong_system_cookie_is_rejected_not_passed_through() {
    let f = fixture();
    let material = AuthMaterial {
        system_cookie: Some("wrong".into()),
        bearer: Some("would-be-valid".into()),
        ..Default::default()
    };
    assert_eq!(f.auth.sign_in(&material).await, Err(BusAuthError::BadSystemCookie));
}

#[tokio::test]
async fn project_secret_yields_project_identity() {
    let f = fixture();
    let project_id = Uuid::new_v4();
    f.secrets.set(project_id, "s3cret");
    let material = AuthMaterial {
        project_id: Some(project_id),
        project_secret: Some("s3cret".into()),
        ..Default::default()
    };
    assert_eq!(f.auth.sign_in(&material).await, Ok(AuthId::Project(project_id)));
}

#[tokio::test]
async fn mismatched_project_secret_fails() {
    let f = fixture();
    let project_id = Uuid::new_v4();
    f.secrets.set(project_id, "right");
    let material = AuthMaterial {
        project_id: Some(project_id),
        project_secret: Some("wrong".into()),
        ..Default::default()
    };
    assert_eq!(f.auth.sign_in(&material).await, Err(BusAuthError::BadProjectSecret));
}

#[tokio::test]
async fn unknown_project_fails() {
    let f = fixture();
    let material = AuthMaterial {
        project_id: Some(Uuid::new_v4()),
        project_secret: Some("anything".into()),
        ..Default::default()
    };
    assert_eq!(f.auth.sign_in(&material).await, Err(BusAuthError::BadProjectSecret));
}

#[tokio::test]
async fn bearer_token_yields_account() {
    let f = fixture();
    let account_id = Uuid::new_v4();
    let now = f.auth.clock.epoch_secs();
    let token = sign_for_tests(
        &f.signing,
        &RoutedClaims {
            sub: account_id.to_string(),
            aud: f.auth.host_id,
            act: "account".into(),
            iat: now,
            exp: now + 60,
            project_id: Uuid::new_v4(),
        },
    );
    let material = AuthMaterial { bearer: Some(token), ..Default::default() };
    assert_eq!(f.auth.sign_in(&material).await, Ok(AuthId::Account(account_id)));
}

#[tokio::test]
async fn expired_bearer_is_typed_error() {
    let f = fixture();
    let now = f.auth.clock.epoch_secs();
    let token = sign_for_tests(
        &f.signing,
        &RoutedClaims {
            sub: Uuid::new_v4().to_string(),
            aud: f.auth.host_id,
            act: "account".into(),
            iat: now.saturating_sub(120),
            exp: now.saturating_sub(60),
            project_id: Uuid::new_v4(),
        },
    );
    let material = AuthMaterial { bearer: Some(token), ..Default::default() };
    assert_eq!(
        f.auth.sign_in(&material).await,
        Err(BusAuthError::InvalidToken(TokenError::Expired))
    );
}

#[tokio::test]
async fn empty_material_is_missing_credentials() {
    let f = fixture();
    assert_eq!(
        f.auth.sign_in(&AuthMaterial::default()).await,
        Err(BusAuthError::MissingCredentials)
    );
}
