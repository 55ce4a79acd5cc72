use crate::utils::sir_validity_assert;

/// Internal consistency checks, gated by `SIRC_VALIDITY_CHECKS`.
///
/// These are structural well-formedness checks on the implementation's own
/// data, not the user-facing analyses: a failure here is a bug in a
/// transformation, not in the analyzed program.
pub trait HasValidityCheck {
    fn check_validity(&self) -> Result<(), String>;

    fn assert_validity(&self) {
        let result = self.check_validity();
        sir_validity_assert!(
            result.is_ok(),
            "Validity check failed: {}",
            result.as_ref().err().map(String::as_str).unwrap_or("")
        );
    }

    fn is_valid(&self) -> bool {
        self.check_validity().is_ok()
    }
}
