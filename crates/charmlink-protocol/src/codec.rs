use crate::error::DecodeError;

/// Hex-encode the UTF-8 bytes of `text`. Output is lowercase.
pub fn encode(text: &str) -> String {
    hex::encode(text.as_bytes())
}

/// Decode hex into raw bytes. Whitespace anywhere in the input is ignored;
/// upper and lower case digits are both accepted.
pub fn decode_bytes(input: &str) -> Result<Vec<u8>, DecodeError> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    hex::decode(&digits).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => {
            DecodeError::InvalidHex { ch: c, position: index }
        }
        _ => DecodeError::OddLength(digits.len()),
    })
}

/// Decode hex into text, the inverse of [`encode`].
pub fn decode(input: &str) -> Result<String, DecodeError> {
    let bytes = decode_bytes(input)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const HEX_DIGITS: &[u8] = b"0123456789abcdefABCDEF";

    #[test]
    fn roundtrip_text() {
        for s in ["", "hello", "héllo wörld ✨", "{\"a\":1}", "line\nbreak\ttab"] {
            assert_eq!(decode(&encode(s)).unwrap(), s);
        }
    }

    #[test]
    fn roundtrip_hex_is_case_normalized() {
        let upper = "48656C6C6F";
        assert_eq!(encode(&decode(upper).unwrap()), upper.to_lowercase());
    }

    #[test]
    fn whitespace_is_stripped() {
        assert_eq!(decode(" 68 69\n").unwrap(), "hi");
    }

    #[test]
    fn odd_length_rejected() {
        assert!(matches!(decode("686"), Err(DecodeError::OddLength(3))));
    }

    #[test]
    fn non_hex_rejected() {
        assert!(matches!(
            decode("68zz"),
            Err(DecodeError::InvalidHex { ch: 'z', position: 2 })
        ));
    }

    #[test]
    fn invalid_utf8_rejected_as_text_but_not_as_bytes() {
        assert_eq!(decode_bytes("ff").unwrap(), vec![0xff]);
        assert!(matches!(decode("ff"), Err(DecodeError::InvalidUtf8(_))));
    }

    #[test]
    fn arbitrary_text_and_bytes_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let len = rng.random_range(0..64);
            let text: String = (0..len).map(|_| rng.random::<char>()).collect();
            assert_eq!(decode(&encode(&text)).unwrap(), text);

            let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            assert_eq!(decode_bytes(&hex::encode(&bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn arbitrary_hex_reencodes_lowercase() {
        let mut rng = StdRng::seed_from_u64(0xc0de);
        for _ in 0..500 {
            let pairs = rng.random_range(0..32);
            let mut input = String::new();
            let mut digits = String::new();
            for _ in 0..pairs * 2 {
                let digit = HEX_DIGITS[rng.random_range(0..HEX_DIGITS.len())] as char;
                digits.push(digit);
                input.push(digit);
                if rng.random_bool(0.1) {
                    input.push([' ', '\n', '\t'][rng.random_range(0..3)]);
                }
            }

            let bytes = decode_bytes(&input).unwrap();
            assert_eq!(hex::encode(&bytes), digits.to_lowercase());

            digits.push('a');
            assert!(matches!(decode_bytes(&digits), Err(DecodeError::OddLength(_))));
        }
    }
}
