//! Bounded binary expansion of integer variables and slack.
//!
//! A value in `[lower, upper]` is written as `lower + Σ c_k b_k` with
//! coefficients `1, 2, 4, …, 2^(k-1)` followed by the remainder that brings
//! the maximum up to exactly `upper`. Every integer in range is reachable and
//! nothing outside it is.

/// Binary expansion of one bounded quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryEncoding {
    /// Value when every bit is zero.
    pub offset: f64,
    /// Weight of each bit.
    pub coefficients: Vec<f64>,
}

impl BinaryEncoding {
    /// Encoding of `[lower, upper]`. An empty or inverted range gets no bits.
    pub fn bounded(lower: f64, upper: f64) -> Self {
        let range = upper - lower;
        let mut coefficients = Vec::new();
        if range > 0.0 {
            let mut covered = 0.0;
            let mut next = 1.0;
            while covered + next <= range {
                coefficients.push(next);
                covered += next;
                next *= 2.0;
            }
            let remainder = range - covered;
            if remainder > 0.0 {
                coefficients.push(remainder);
            }
        }
        Self {
            offset: lower,
            coefficients,
        }
    }

    /// The single bit of a binary variable.
    pub fn binary() -> Self {
        Self {
            offset: 0.0,
            coefficients: vec![1.0],
        }
    }

    /// Number of bits.
    pub fn num_bits(&self) -> usize {
        self.coefficients.len()
    }

    /// Largest representable value.
    pub fn max_value(&self) -> f64 {
        self.offset + self.coefficients.iter().sum::<f64>()
    }

    /// Value of the given bits.
    pub fn value(&self, bits: &[u8]) -> f64 {
        self.offset
            + self
                .coefficients
                .iter()
                .zip(bits)
                .filter(|(_, &b)| b != 0)
                .map(|(c, _)| c)
                .sum::<f64>()
    }

    /// Bits for `target`, clamped into range. Exact when `target - offset`
    /// is an integer and the range is integral.
    pub fn encode(&self, target: f64) -> Vec<u8> {
        let n = self.coefficients.len();
        let mut bits = vec![0; n];
        if n == 0 {
            return bits;
        }
        let mut rest = (target - self.offset).clamp(0.0, self.max_value() - self.offset);

        // The trailing coefficient may be a remainder, not a power of two;
        // take it first when the powers alone cannot cover `rest`.
        let powers = power_prefix(&self.coefficients);
        let power_sum: f64 = self.coefficients[..powers].iter().sum();
        if powers < n && rest > power_sum + 0.5 {
            bits[n - 1] = 1;
            rest -= self.coefficients[n - 1];
        }

        let mut whole = rest.round().max(0.0) as u64;
        for k in 0..powers {
            if whole & 1 == 1 {
                bits[k] = 1;
            }
            whole >>= 1;
        }
        bits
    }
}

/// Length of the leading run of coefficients equal to 1, 2, 4, ….
fn power_prefix(coefficients: &[f64]) -> usize {
    let mut expected = 1.0;
    let mut n = 0;
    for &c in coefficients {
        if c != expected {
            break;
        }
        n += 1;
        expected *= 2.0;
    }
    n
}
