use botfleet_env::Fingerprint;
use proptest::prelude::*;

proptest! {
    #[test]
    fn identical_content_identical_fingerprint(content in prop::collection::vec(any::<u8>(), 0..4096)) {
        let copy = content.clone();
        prop_assert_eq!(Fingerprint::of_bytes(&content), Fingerprint::of_bytes(&copy));
    }

    #[test]
    fn any_byte_mutation_changes_fingerprint(
        content in prop::collection::vec(any::<u8>(), 1..4096),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut mutated = content.clone();
        let i = index.index(mutated.len());
        mutated[i] ^= flip;
        prop_assert_ne!(Fingerprint::of_bytes(&content), Fingerprint::of_bytes(&mutated));
    }

    #[test]
    fn appending_changes_fingerprint(
        content in prop::collection::vec(any::<u8>(), 0..1024),
        extra in any::<u8>(),
    ) {
        let mut longer = content.clone();
        longer.push(extra);
        prop_assert_ne!(Fingerprint::of_bytes(&content), Fingerprint::of_bytes(&longer));
    }

    #[test]
    fn stored_form_parses_back(content in prop::collection::vec(any::<u8>(), 0..256)) {
        let fp = Fingerprint::of_bytes(&content);
        prop_assert_eq!(Fingerprint::parse(&format!("{}\n", fp)), Some(fp));
    }
}
