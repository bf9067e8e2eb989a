use mailroom::auth::{hash_password, verify_password};

#[tokio::test]
async fn password_hashing_roundtrip() {
    let password = "secure-password-123".to_string();

    let hash = hash_password(password.clone()).await.unwrap();
    assert!(hash.starts_with("$argon2"));

    assert!(verify_password(password, hash.clone()).await.unwrap());
    assert!(!verify_password("wrong-password".to_string(), hash)
        .await
        .unwrap());
}

#[tokio::test]
async fn malformed_hash_is_an_error() {
    assert!(verify_password("pw".to_string(), "plaintext".to_string())
        .await
        .is_err());
}
