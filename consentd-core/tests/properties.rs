//! Property-based tests for consentd core

use proptest::prelude::*;

use chrono::{Duration, TimeZone, Utc};
use consentd_core::auth::signature::{
    address_from_verifying_key, hash_personal_message, recover_address, SIGNATURE_LENGTH,
};
use consentd_core::auth::{SignInFields, TokenIssuer, MESSAGE_VERSION};
use consentd_core::flags::{PermissionMask, FLAG_COUNT};
use consentd_core::negotiation;
use consentd_core::*;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;

const MASK_SPACE: u64 = 1 << FLAG_COUNT;

fn mask(raw: u64) -> PermissionMask {
    PermissionMask::from_raw(raw).unwrap()
}

proptest! {
    #[test]
    fn props_decode_encode_roundtrip(raw in 0..MASK_SPACE) {
        let original = mask(raw);
        let set: Vec<&str> = original
            .decode()
            .into_iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| name)
            .collect();
        prop_assert_eq!(PermissionMask::encode(set).unwrap(), original);
    }

    #[test]
    fn props_serialized_form_contains_only_true_flags(raw in 0..MASK_SPACE) {
        let json = serde_json::to_value(mask(raw)).unwrap();
        let object = json.as_object().unwrap();

        prop_assert_eq!(object.len() as u32, raw.count_ones());
        for value in object.values() {
            prop_assert_eq!(value, &serde_json::Value::Bool(true));
        }
    }

    #[test]
    fn props_full_grant_is_accepted(raw in 0..MASK_SPACE) {
        prop_assert_eq!(
            negotiation::derive_status(mask(raw), mask(raw)),
            ConsentStatus::Accepted
        );
    }

    #[test]
    fn props_empty_grant_is_denied(raw in 1..MASK_SPACE) {
        prop_assert_eq!(
            negotiation::derive_status(mask(raw), mask(0)),
            ConsentStatus::Denied
        );
    }

    #[test]
    fn props_partial_grant_is_resolved(request in 1..MASK_SPACE, seed in 0..MASK_SPACE) {
        let grant = seed & request;
        prop_assume!(grant != 0 && grant != request);

        prop_assert_eq!(
            negotiation::derive_status(mask(request), mask(grant)),
            ConsentStatus::Resolved
        );
    }

    #[test]
    fn props_excess_grant_is_rejected(request in 0..MASK_SPACE, grant in 0..MASK_SPACE) {
        prop_assume!(grant & !request != 0);

        prop_assert!(negotiation::validate_grant(mask(request), mask(grant)).is_err());
        prop_assert!(negotiation::evaluate_response(mask(request), mask(grant)).is_err());
    }

    #[test]
    fn props_subset_grant_is_accepted_by_validation(request in 0..MASK_SPACE, seed in 0..MASK_SPACE) {
        let grant = seed & request;
        prop_assert!(negotiation::validate_grant(mask(request), mask(grant)).is_ok());
    }

    #[test]
    fn props_sign_in_message_is_deterministic(
        nonce in "[0-9a-f]{32,64}",
        chain_id in any::<u64>(),
        offset in 0i64..100_000_000,
    ) {
        let address = Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let issued_at = Utc.timestamp_opt(1_600_000_000 + offset, 0).unwrap();

        let fields = SignInFields {
            domain: "consent.example.org",
            address: &address,
            statement: "Sign in to manage consent petitions for your assets.",
            uri: "https://consent.example.org",
            version: MESSAGE_VERSION,
            chain_id,
            nonce: &nonce,
            issued_at,
            expires_at: issued_at + Duration::seconds(900),
        };

        let first = fields.build();
        prop_assert_eq!(&first, &fields.build());
        prop_assert!(first.contains(&format!("Nonce: {}", nonce)), "nonce missing from message");
        prop_assert!(first.contains(&format!("Chain ID: {}", chain_id)), "chain id missing from message");
        prop_assert!(first.starts_with("consent.example.org wants you to sign in"));
    }
}

proptest! {
    // Key generation and recovery dominate the runtime here
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn props_recovered_signer_matches_key(message in ".{1,200}") {
        let key = SigningKey::random(&mut OsRng);
        let address = address_from_verifying_key(key.verifying_key());

        let digest = hash_personal_message(&message);
        let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();

        let mut bytes = Vec::with_capacity(SIGNATURE_LENGTH);
        bytes.extend_from_slice(&signature.to_bytes());
        bytes.push(recovery_id.to_byte());

        prop_assert_eq!(recover_address(&message, &bytes).unwrap(), address);
    }

    #[test]
    fn props_token_subject_roundtrips(seed in any::<[u8; 20]>(), chain_id in any::<u64>()) {
        let issuer = TokenIssuer::new(b"property-secret", 600);
        let address = Address::from_bytes(seed);

        let issued = issuer.issue(&address, chain_id).unwrap();
        let session = issuer.verify(&issued.token).unwrap();

        prop_assert_eq!(session.address, address);
        prop_assert_eq!(session.chain_id, chain_id);
    }
}
