use mailroom::crypto::{CryptoError, EncryptionKey};

fn key(byte: u8) -> EncryptionKey {
    EncryptionKey::try_from(&[byte; 32][..]).unwrap()
}

#[tokio::test]
async fn sealed_password_opens_with_same_key() {
    let key = key(0);

    let sealed = key.seal("smtp-password".to_string()).await.unwrap();
    assert_ne!(sealed, b"smtp-password".to_vec());

    let opened = key.open(sealed).await.unwrap();
    assert_eq!(opened, "smtp-password");
}

#[tokio::test]
async fn wrong_key_cannot_open() {
    let sealed = key(0).seal("secret".to_string()).await.unwrap();
    assert!(key(1).open(sealed).await.is_err());
}

#[tokio::test]
async fn tampered_ciphertext_is_rejected() {
    let key = key(0);
    let mut sealed = key.seal("secret".to_string()).await.unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 1;

    assert!(key.open(sealed).await.is_err());
}

#[tokio::test]
async fn generated_key_round_trips_through_base64() {
    let (key, encoded) = EncryptionKey::generate();
    let decoded = EncryptionKey::try_from_base64(&encoded).unwrap();

    let sealed = key.seal("hello".to_string()).await.unwrap();
    assert_eq!(decoded.open(sealed).await.unwrap(), "hello");
}

#[test]
fn short_key_is_rejected() {
    assert!(matches!(
        EncryptionKey::try_from(&[0u8; 16][..]),
        Err(CryptoError::KeyLength(16))
    ));
    assert!(matches!(
        EncryptionKey::try_from_base64("dG9vLXNob3J0"),
        Err(CryptoError::KeyLength(9))
    ));
    assert!(EncryptionKey::try_from_base64("not base64!").is_err());
}

#[test]
fn long_key_is_rejected() {
    assert!(matches!(
        EncryptionKey::try_from(&[0u8; 64][..]),
        Err(CryptoError::KeyLength(64))
    ));
}
