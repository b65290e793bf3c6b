use chrono::Utc;
use nanoid::nanoid;

const SUFFIX_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Produces the key shared by the metadata record and the blob of one upload.
pub trait IdentityGenerator: Send + Sync {
    fn generate(&self, original_file_name: &str) -> String;
}

/// `<utc timestamp>_<random suffix>_<original file name>`.
///
/// The random suffix keeps ids distinct when the clock does not advance
/// between two calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampIdentityGenerator;

impl IdentityGenerator for TimestampIdentityGenerator {
    fn generate(&self, original_file_name: &str) -> String {
        format!(
            "{}_{}_{}",
            Utc::now().format("%Y%m%dT%H%M%S%.9fZ"),
            nanoid!(8, &SUFFIX_ALPHABET),
            original_file_name
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_ids_are_unique_for_same_name() {
        let generator = TimestampIdentityGenerator;
        let ids: HashSet<String> = (0..10_000)
            .map(|_| generator.generate("holiday.jpg"))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_id_layout() {
        let id = TimestampIdentityGenerator.generate("report final.pdf");
        let mut parts = id.splitn(3, '_');
        let timestamp = parts.next().unwrap();
        let suffix = parts.next().unwrap();
        let name = parts.next().unwrap();

        assert_eq!(timestamp.len(), "20240101T000000.000000000Z".len());
        assert!(timestamp.ends_with('Z'));
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| SUFFIX_ALPHABET.contains(&c)));
        assert_eq!(name, "report final.pdf");
    }

    #[test]
    fn test_empty_name_still_yields_id() {
        let id = TimestampIdentityGenerator.generate("");
        assert!(id.ends_with('_'));
        assert_ne!(id, TimestampIdentityGenerator.generate(""));
    }
}
