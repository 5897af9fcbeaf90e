pub mod der;
pub mod validator;
pub mod x509;

pub use der::DerParser;
pub use validator::{
    build_certificate_chain, check_revocation, hostname_matches, validate_certificate,
    RevocationStatus, ValidationResult,
};
pub use x509::{parse_certificate, Certificate};
