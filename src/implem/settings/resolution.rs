use std::fmt;
use std::str::FromStr;

use crate::model::encoder::Resolution;

impl Default for Resolution {
	fn default() -> Self {
		Resolution {
			width: 640,
			height: 480,
		}
	}
}

impl FromStr for Resolution {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (width, height) = s.split_once("x")
			.ok_or_else(|| format!("resolution {} is not in the form of WxH", s))?;

		let parse = |v: &str| v.parse::<usize>()
			.map_err(|e| format!("invalid resolution {}: {}", s, e));
		let (width, height) = (parse(width)?, parse(height)?);

		if width == 0 || height == 0 {
			return Err(format!("resolution {} has a zero dimension", s));
		}

		Ok(Resolution { width, height })
	}
}

impl fmt::Display for Resolution {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}x{}", self.width, self.height)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_width_by_height() {
		let res: Resolution = "1280x720".parse().unwrap();
		assert_eq!((res.width, res.height), (1280, 720));
		assert_eq!(res.to_string(), "1280x720");
	}

	#[test]
	fn rejects_malformed_input() {
		assert!("1280".parse::<Resolution>().is_err());
		assert!("axb".parse::<Resolution>().is_err());
		assert!("0x480".parse::<Resolution>().is_err());
	}
}
