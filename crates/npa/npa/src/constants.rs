//! Protocol constants of the EAC card interface

/// Default certificate authority reference announced after PACE
pub const DEFAULT_CA_REFERENCE: &str = "DECVCAeID00102";

/// Key id of the chip authentication key announced in EF.CardAccess
pub const CA_KEY_ID: u8 = 13;

/// Retry counter of the PIN after a successful PACE-PIN or PACE-PUK run
pub const PIN_MAX_RETRIES: u8 = 3;
/// Initial retry counter of the PUK
pub const PUK_MAX_RETRIES: u8 = 10;

/// Block length of the secure messaging cipher (AES)
pub const SM_BLOCK_LENGTH: usize = 16;

/// EF.CardAccess advertising PACE-ECDH-GM-AES-CBC-CMAC-128 on parameter id 12 (NIST P-256)
pub const DEFAULT_EF_CARD_ACCESS: &[u8] = &[
    0x31, 0x14, 0x30, 0x12, 0x06, 0x0A, 0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x04, 0x02,
    0x02, 0x02, 0x01, 0x02, 0x02, 0x01, 0x0C,
];

/// Instruction bytes handled by the card
pub mod ins {
    /// MSE
    pub const MANAGE_SECURITY_ENVIRONMENT: u8 = 0x22;
    /// PSO
    pub const PERFORM_SECURITY_OPERATION: u8 = 0x2A;
    /// RESET RETRY COUNTER
    pub const RESET_RETRY_COUNTER: u8 = 0x2C;
    /// EXTERNAL AUTHENTICATE
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
    /// GET CHALLENGE
    pub const GET_CHALLENGE: u8 = 0x84;
    /// GENERAL AUTHENTICATE
    pub const GENERAL_AUTHENTICATE: u8 = 0x86;
}

/// Class bytes accepted by the card
pub mod cla {
    /// Interindustry class, no secure messaging
    pub const PLAIN: u8 = 0x00;
    /// Secure messaging with authenticated header
    pub const SECURE_MESSAGING: u8 = 0x0C;
    /// Command chaining
    pub const CHAINING: u8 = 0x10;
    /// Command chaining under secure messaging
    pub const CHAINING_SECURE_MESSAGING: u8 = 0x1C;
}

/// MSE parameters
pub mod mse {
    /// P1 low nibble for SET
    pub const SET: u8 = 0x01;
    /// P2 for the authentication template
    pub const AUTHENTICATION_TEMPLATE: u8 = 0xA4;
    /// P2 for the digital signature template
    pub const DIGITAL_SIGNATURE_TEMPLATE: u8 = 0xB6;
}

/// RESET RETRY COUNTER P1 values
pub mod reset_retry_counter {
    /// Change the referenced secret
    pub const CHANGE: u8 = 0x02;
    /// Resume or unblock the referenced secret
    pub const RESUME: u8 = 0x03;
}

/// PSO:VERIFY CERTIFICATE P2
pub const PSO_VERIFY_CERTIFICATE: (u8, u8) = (0x00, 0xBE);

/// Data object tags
pub mod tags {
    /// Dynamic authentication data wrapping every GENERAL AUTHENTICATE payload
    pub const DYNAMIC_AUTHENTICATION_DATA: u8 = 0x7C;

    // PACE
    /// Encrypted nonce
    pub const ENCRYPTED_NONCE: u8 = 0x80;
    /// Mapping data of the terminal
    pub const MAPPING_DATA_TERMINAL: u8 = 0x81;
    /// Mapping data of the chip
    pub const MAPPING_DATA_CHIP: u8 = 0x82;
    /// Ephemeral public key of the terminal
    pub const EPHEMERAL_KEY_TERMINAL: u8 = 0x83;
    /// Ephemeral public key of the chip
    pub const EPHEMERAL_KEY_CHIP: u8 = 0x84;
    /// Authentication token of the terminal
    pub const TOKEN_TERMINAL: u8 = 0x85;
    /// Authentication token of the chip
    pub const TOKEN_CHIP: u8 = 0x86;
    /// Certificate authority reference for TA
    pub const CA_REFERENCE: u8 = 0x87;

    // Chip authentication
    /// Ephemeral public key of the terminal
    pub const CA_EPHEMERAL_KEY_TERMINAL: u8 = 0x80;
    /// Nonce for the CA key derivation
    pub const CA_NONCE: u8 = 0x81;
    /// Authentication token of the chip
    pub const CA_TOKEN: u8 = 0x82;

    // Control reference templates
    /// Cryptographic mechanism reference (OID)
    pub const CRYPTOGRAPHIC_MECHANISM: u8 = 0x80;
    /// Public key reference
    pub const PUBLIC_KEY_REFERENCE: u8 = 0x83;
    /// Private key reference
    pub const PRIVATE_KEY_REFERENCE: u8 = 0x84;
    /// Auxiliary authenticated data
    pub const AUXILIARY_DATA: u8 = 0x67;
    /// Ephemeral public key
    pub const EPHEMERAL_PUBLIC_KEY: u8 = 0x91;
    /// Certificate holder authorization template
    pub const CHAT: [u8; 2] = [0x7F, 0x4C];

    // Card verifiable certificates
    /// CV certificate
    pub const CV_CERTIFICATE: [u8; 2] = [0x7F, 0x21];
    /// Certificate body
    pub const CERTIFICATE_BODY: [u8; 2] = [0x7F, 0x4E];
    /// Public key
    pub const PUBLIC_KEY: [u8; 2] = [0x7F, 0x49];
    /// Certificate authority reference
    pub const CERTIFICATE_AUTHORITY_REFERENCE: u8 = 0x42;
    /// Certificate holder reference
    pub const CERTIFICATE_HOLDER_REFERENCE: [u8; 2] = [0x5F, 0x20];
    /// Certificate profile identifier
    pub const CERTIFICATE_PROFILE_IDENTIFIER: [u8; 2] = [0x5F, 0x29];
    /// Certificate signature
    pub const SIGNATURE: [u8; 2] = [0x5F, 0x37];
    /// Object identifier
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    /// Public point of an EC key
    pub const EC_PUBLIC_POINT: u8 = 0x86;
}

/// Secure messaging data objects
pub mod sm {
    /// Cryptogram prefixed with a padding indicator
    pub const CRYPTOGRAM: u8 = 0x87;
    /// Expected length
    pub const LE: u8 = 0x97;
    /// Plain processing status
    pub const PROCESSING_STATUS: u8 = 0x99;
    /// Cryptographic checksum
    pub const CHECKSUM: u8 = 0x8E;
    /// Digital signature
    pub const SIGNATURE: u8 = 0x9E;
    /// Padding indicator for ISO/IEC 7816-4 padding
    pub const PADDING_INDICATOR: u8 = 0x01;
}

/// Object identifiers below bsi-de (0.4.0.127.0.7)
pub mod oid {
    /// id-PACE
    pub const PACE: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x04];
    /// id-TA
    pub const TA: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x02];
    /// id-CA
    pub const CA: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x03];

    /// id-PACE-ECDH-GM-AES-CBC-CMAC-128
    pub const PACE_ECDH_GM_AES_CBC_CMAC_128: &[u8] =
        &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x04, 0x02, 0x02];
    /// id-TA-ECDSA-SHA-256
    pub const TA_ECDSA_SHA_256: &[u8] =
        &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x02, 0x02, 0x03];
    /// id-CA-ECDH-AES-CBC-CMAC-128
    pub const CA_ECDH_AES_CBC_CMAC_128: &[u8] =
        &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x03, 0x02, 0x02];

    /// Standardized domain parameter id of NIST P-256
    pub const PARAMETER_ID_P256: u8 = 12;
}
