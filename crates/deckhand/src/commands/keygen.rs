use deckhand_env::SecretCipher;

/// Print a fresh base64 secret key.
pub fn keygen() {
    println!("{}", SecretCipher::generate_key());
}
