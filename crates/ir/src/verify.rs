//! Structural validation of procedure graphs.
//!
//! The layout passes assume the shapes checked here; running the verifier
//! at pass boundaries turns caller mistakes into diagnosable errors
//! instead of panics deep inside an analysis.

use thiserror::Error;

use crate::{
    function::{BlockId, Function},
    inst::Middle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("terminator of {0} targets nonexistent {1}")]
    UnknownSucc(BlockId, BlockId),
    #[error("safe foreign call in {0} resumes at nonexistent {1}")]
    UnknownCallCont(BlockId, BlockId),
    #[error("{0} declares negative argument bytes")]
    NegativeArgBytes(BlockId),
    #[error("return offset of {0} lies outside its argument block")]
    ReturnOffOutOfRange(BlockId),
    #[error("procedure declares negative incoming argument bytes")]
    NegativeProcArgBytes,
}

pub fn verify(func: &Function) -> Result<(), VerifyError> {
    if func.arg_bytes < 0 {
        return Err(VerifyError::NegativeProcArgBytes);
    }

    for (id, data) in func.blocks.iter() {
        for succ in data.last.succs() {
            if func.blocks.get(succ).is_none() {
                return Err(VerifyError::UnknownSucc(id, succ));
            }
        }
        for m in &data.middles {
            if let Middle::SafeForeignCall { cont, .. } = m {
                if func.blocks.get(*cont).is_none() {
                    return Err(VerifyError::UnknownCallCont(id, *cont));
                }
            }
        }
        match data.stack_info.arg_bytes {
            Some(a) if a < 0 => return Err(VerifyError::NegativeArgBytes(id)),
            Some(a) => {
                if let Some(r) = data.stack_info.return_off {
                    if r < 0 || r > a {
                        return Err(VerifyError::ReturnOffOutOfRange(id));
                    }
                }
            }
            None => {}
        }
    }
    Ok(())
}
