//! Bolero fuzzer for the conflict-edge filter.
//!
//! Properties tested:
//! - conflicts come back in input order
//! - a candidate is dropped exactly when it has more than MAX_REMOVED of them

use bolero::check;
use tricolor_fuzz::conflict_model::execute_and_verify;

fn main() {
    check!()
        .with_type::<(Vec<(u8, u8)>, Vec<u8>)>()
        .for_each(|(pairs, colours)| {
            if let Err(e) = execute_and_verify(pairs, colours) {
                panic!("Invariant violated: {}", e);
            }
        });
}

#[cfg(test)]
mod tests {
    use tricolor_fuzz::conflict_model::execute_and_verify;

    #[test]
    fn fuzz_conflicts_monochrome() {
        let pairs: Vec<(u8, u8)> = (0..11).map(|i| (i, i + 1)).collect();
        execute_and_verify(&pairs[..8], &[]).unwrap();
        execute_and_verify(&pairs, &[]).unwrap();
    }

    #[test]
    fn fuzz_conflicts_proper_colouring() {
        execute_and_verify(&[(0, 1), (1, 2), (2, 0)], &[0, 1, 2]).unwrap();
    }
}
