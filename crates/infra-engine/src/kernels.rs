// Compute kernels
// Pure CPU work, deterministic for a given payload. Every kernel polls the
// cancel flag between rounds.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use workgate_core::domain::{Operation, WorkPayload};
use workgate_core::port::ComputationError;

/// Iterations per complexity level for `hash` and `transform`
pub const ITERATIONS_PER_LEVEL: u64 = 200;

/// Outer rounds per complexity level for `matrix`
pub const MATRIX_ROUNDS_PER_LEVEL: u64 = 100;

/// Largest matrix edge actually multiplied
pub const MATRIX_MAX_EDGE: u64 = 50;

/// Upper bound on `prime.n`
pub const PRIME_MAX_N: u64 = 100_000;

/// Numbers are squared modulo this so repeated passes stay bounded
const TRANSFORM_MODULUS: i64 = 1_000_000_007;

/// Rounds between cancel-flag polls
const CANCEL_POLL_INTERVAL: u64 = 64;

type KernelResult = Result<Value, ComputationError>;

fn check_cancel(round: u64, cancel: &AtomicBool) -> Result<(), ComputationError> {
    if round % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
        return Err(ComputationError::Cancelled);
    }
    Ok(())
}

/// Dispatch on `payload.operation`
pub fn run(payload: &WorkPayload, cancel: &AtomicBool) -> KernelResult {
    let level = payload.complexity.level() as u64;
    let data = payload.data.as_object().ok_or_else(|| {
        ComputationError::InvalidInput("payload.data must be a JSON object".to_string())
    })?;

    match payload.operation {
        Operation::Hash => {
            let input = optional_str(data, "input")?.unwrap_or("default");
            hash(input, level * ITERATIONS_PER_LEVEL, cancel)
        }
        Operation::Prime => {
            let n = optional_u64(data, "n")?.unwrap_or(100);
            prime(n, level, cancel)
        }
        Operation::Matrix => {
            let size = optional_u64(data, "size")?.unwrap_or(10 * level);
            matrix(size, level, cancel)
        }
        Operation::Transform => {
            let items = match data.get("items") {
                None => (0..10).map(Value::from).collect(),
                Some(Value::Array(items)) => items.clone(),
                Some(_) => {
                    return Err(ComputationError::InvalidInput(
                        "transform: 'items' must be an array".to_string(),
                    ))
                }
            };
            transform(items, level * ITERATIONS_PER_LEVEL, cancel)
        }
    }
}

fn optional_str<'a>(data: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, ComputationError> {
    match data.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ComputationError::InvalidInput(format!(
            "'{}' must be a string",
            key
        ))),
    }
}

fn optional_u64(data: &Map<String, Value>, key: &str) -> Result<Option<u64>, ComputationError> {
    match data.get(key) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ComputationError::InvalidInput(format!("'{}' must be a non-negative integer", key))
        }),
    }
}

/// Iterative SHA-256 of `input`
pub fn hash(input: &str, iterations: u64, cancel: &AtomicBool) -> KernelResult {
    let mut digest = input.as_bytes().to_vec();
    for round in 0..iterations {
        check_cancel(round, cancel)?;
        digest = Sha256::digest(&digest).to_vec();
    }

    Ok(json!({
        "output": hex::encode(&digest),
        "iterations": iterations,
        "operation": "hash",
    }))
}

fn is_prime(num: u64) -> bool {
    if num < 2 {
        return false;
    }
    let mut i = 2;
    while i * i <= num {
        if num % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}

/// Search for the `n`th prime, giving up after `n * level` candidates
///
/// `position` reports how many primes were actually found.
pub fn prime(n: u64, level: u64, cancel: &AtomicBool) -> KernelResult {
    if n == 0 || n > PRIME_MAX_N {
        return Err(ComputationError::InvalidInput(format!(
            "prime: 'n' must be in 1..={}",
            PRIME_MAX_N
        )));
    }

    let max_checks = n * level;
    let (mut count, mut candidate, mut last_prime) = (0u64, 2u64, 2u64);
    let mut checks = 0u64;

    while count < n && checks < max_checks {
        check_cancel(checks, cancel)?;
        if is_prime(candidate) {
            last_prime = candidate;
            count += 1;
        }
        candidate += 1;
        checks += 1;
    }

    Ok(json!({
        "prime": last_prime,
        "position": count,
        "operation": "prime",
    }))
}

/// Repeated multiply-accumulate over two generated square matrices
pub fn matrix(size: u64, level: u64, cancel: &AtomicBool) -> KernelResult {
    let edge = size.min(MATRIX_MAX_EDGE) as usize;
    let a: Vec<Vec<i64>> = (0..edge)
        .map(|i| (0..edge).map(|j| (i + j) as i64).collect())
        .collect();
    let b: Vec<Vec<i64>> = (0..edge)
        .map(|i| (0..edge).map(|j| (i * j) as i64).collect())
        .collect();

    let rounds = level * MATRIX_ROUNDS_PER_LEVEL;
    let mut sum: i64 = 0;
    for round in 0..rounds {
        check_cancel(round, cancel)?;
        for i in 0..edge {
            for j in 0..edge {
                sum = sum.wrapping_add(a[i][j].wrapping_mul(b[j][i % edge]));
            }
        }
    }

    Ok(json!({
        "result_sum": sum,
        "size": size,
        "iterations": rounds,
        "operation": "matrix",
    }))
}

fn transform_item(item: Value) -> Result<Value, ComputationError> {
    match item {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let r = i.rem_euclid(TRANSFORM_MODULUS);
                Ok(Value::from(r * r % TRANSFORM_MODULUS))
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                let squared = f * f;
                if squared.is_finite() {
                    Ok(Value::from(squared))
                } else {
                    Err(ComputationError::Failed(
                        "transform: numeric overflow".to_string(),
                    ))
                }
            }
        }
        Value::String(s) => Ok(Value::String(s.to_uppercase())),
        other => Ok(Value::String(other.to_string().to_uppercase())),
    }
}

/// Square numbers and upper-case everything else, `iterations` times over
pub fn transform(items: Vec<Value>, iterations: u64, cancel: &AtomicBool) -> KernelResult {
    let mut current = items;
    for round in 0..iterations {
        check_cancel(round, cancel)?;
        current = current
            .into_iter()
            .map(transform_item)
            .collect::<Result<Vec<_>, _>>()?;
    }

    let count = current.len();
    current.truncate(10);
    Ok(json!({
        "transformed": current,
        "count": count,
        "iterations": iterations,
        "operation": "transform",
    }))
}
