//! External tests for ID/name generation, exercised through the public
//! `mini_docker` library API rather than duplicating the inline unit tests in
//! `core::id`.

use std::collections::HashSet;

use mini_docker::core::id::{generate_id, generate_name, validate_id_prefix};

#[test]
fn ids_are_unique_in_bulk() {
    let mut seen = HashSet::new();
    for _ in 0..1000 {
        assert!(seen.insert(generate_id()), "duplicate ID generated");
    }
}

#[test]
fn id_format_is_lowercase_hex_of_expected_length() {
    for _ in 0..100 {
        let id = generate_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }
}

#[test]
fn generated_names_are_adjective_animal_pairs() {
    for _ in 0..50 {
        let name = generate_name();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 2, "name should be adjective-animal: {name}");
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_lowercase())));
    }
}

#[test]
fn prefix_validation_matches_id_shape() {
    assert!(validate_id_prefix("ab12"));
    assert!(validate_id_prefix(&generate_id()));
    assert!(!validate_id_prefix(""));
    assert!(!validate_id_prefix("ABCD"));
    assert!(!validate_id_prefix("0123456789abcdef0"));
    assert!(!validate_id_prefix("zzzz"));
}
