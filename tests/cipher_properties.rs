use locktree::Cipher;
use proptest::prelude::*;

fn fast() -> Cipher {
    Cipher::new(1_000)
}

proptest! {
    // Every case pays for two PBKDF2 derivations.
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_roundtrip_any_text(plaintext in "\\PC{0,64}", password in "[a-zA-Z0-9!@#-]{1,24}") {
        let cipher = fast();
        let envelope = cipher.encrypt(&plaintext, &password);
        prop_assert!(!envelope.is_empty());
        prop_assert_eq!(cipher.decrypt(&envelope, &password), plaintext);
    }

    #[test]
    fn test_wrong_password_yields_sentinel(plaintext in "\\PC{1,32}") {
        let cipher = fast();
        let envelope = cipher.encrypt(&plaintext, "right");
        prop_assert_eq!(cipher.decrypt(&envelope, "wrong"), "");
    }
}

#[test]
fn test_same_plaintext_never_repeats() {
    // Fresh salt and nonce per call.
    let cipher = fast();
    let a = cipher.encrypt("same", "pw");
    let b = cipher.encrypt("same", "pw");
    assert_ne!(a, b);
}

#[test]
fn test_tampering_is_detected() {
    let cipher = fast();
    let envelope = cipher.encrypt("integrity", "pw");

    // Flip one character in the ciphertext region.
    let mut bytes = envelope.into_bytes();
    let last = bytes.len() - 4;
    bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();

    assert_eq!(cipher.decrypt(&tampered, "pw"), "");
    assert!(cipher.try_decrypt(&tampered, "pw").is_err());
}

#[test]
fn test_garbage_envelopes_are_rejected() {
    let cipher = fast();
    assert_eq!(cipher.decrypt("not base64 at all!", "pw"), "");
    assert_eq!(cipher.decrypt("c2hvcnQ=", "pw"), "");
    assert_eq!(cipher.decrypt("", "pw"), "");
}
