use doc_model::{Slug, SLUG_ALPHABET, SLUG_LEN};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Random six-character slug drawn from `[0-9A-Z]`.
pub fn generate_slug<R: Rng + ?Sized>(rng: &mut R) -> Slug {
    let mut indices = [0usize; SLUG_LEN];
    for index in &mut indices {
        *index = rng.gen_range(0..SLUG_ALPHABET.len());
    }
    Slug::from_indices(indices)
}

/// Stored form of a case access password: `hex(sha256("{slug}:{password}"))`.
pub fn hash_access_password(slug: &Slug, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(slug.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());

    hasher.finalize().iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

pub fn verify_access_password(slug: &Slug, candidate: &str, stored_hash: &str) -> bool {
    constant_time_eq(hash_access_password(slug, candidate).as_bytes(), stored_hash.as_bytes())
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }

    left.iter().zip(right).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn slug(text: &str) -> Slug {
        text.parse().expect("slug should parse")
    }

    #[test]
    fn generated_slugs_are_valid_and_vary() {
        let mut rng = StdRng::seed_from_u64(7);

        let first = generate_slug(&mut rng);
        let second = generate_slug(&mut rng);

        assert!(first.as_str().parse::<Slug>().is_ok());
        assert_ne!(first, second);
    }

    #[test]
    fn hash_is_hex_sha256_of_slug_and_password() {
        let hash = hash_access_password(&slug("AB12CD"), "segredo");

        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|byte| byte.is_ascii_hexdigit() && !byte.is_ascii_uppercase()));
        assert_ne!(hash, hash_access_password(&slug("ZZ0000"), "segredo"));
    }

    #[test]
    fn empty_input_hash_matches_known_digest() {
        // sha256("AB12CD:")
        let mut hasher = Sha256::new();
        hasher.update(b"AB12CD:");
        let expected: String = hasher.finalize().iter().map(|byte| format!("{byte:02x}")).collect();

        assert_eq!(hash_access_password(&slug("AB12CD"), ""), expected);
    }

    #[test]
    fn verify_accepts_only_the_right_password() {
        let slug = slug("AB12CD");
        let stored = hash_access_password(&slug, "segredo");

        assert!(verify_access_password(&slug, "segredo", &stored));
        assert!(!verify_access_password(&slug, "Segredo", &stored));
        assert!(!verify_access_password(&slug, "segredo", "short"));
    }
}
