/// The decrypted key material handed to a `Provider` adapter. Adapters never
/// see ciphertext or the Credential Store's bookkeeping.
#[derive(Clone)]
pub struct DecryptedCredential {
    pub api_key: String,
}

impl std::fmt::Debug for DecryptedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedCredential")
            .field("api_key", &mask(&self.api_key))
            .finish()
    }
}

/// Masks all but the last four characters.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible_start = chars.len() - 4;
    let mut masked: String = std::iter::repeat('*').take(visible_start).collect();
    masked.extend(&chars[visible_start..]);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_last_four_chars() {
        assert_eq!(mask("sk-abcdefgh1234"), "**********1234");
        assert_eq!(mask("ab"), "**");
    }
}
