use std::any::Any;

/// Extracts a readable message from a caught panic payload.
///
/// Covers the two payload types `panic!` produces; anything else is reported
/// generically.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return (*msg).to_string();
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return msg.clone();
	}
	"non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
	use std::panic;

	use super::panic_message;

	#[test]
	fn extracts_static_str_payload() {
		let err = panic::catch_unwind(|| panic!("boom-str")).unwrap_err();
		let msg = panic_message(&*err);
		assert!(msg.contains("boom-str"), "expected 'boom-str', got: {msg}");
	}

	#[test]
	fn extracts_string_payload() {
		let err = panic::catch_unwind(|| panic!("{}", String::from("boom-string"))).unwrap_err();
		let msg = panic_message(&*err);
		assert!(msg.contains("boom-string"), "expected 'boom-string', got: {msg}");
	}

	#[test]
	fn reports_opaque_payloads_generically() {
		let err = panic::catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
		assert_eq!(panic_message(&*err), "non-string panic payload");
	}
}
