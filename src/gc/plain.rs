use crate::gc::{ClientKeyT, ContextT};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainClientKey;

impl ClientKeyT for PlainClientKey {
    type Bit = bool;

    fn encrypt(&self, bit: bool) -> bool {
        bit
    }

    fn decrypt(&self, bit: &bool) -> bool {
        *bit
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainContext;

impl ContextT for PlainContext {
    type Bit = bool;

    fn trivial(&self, bit: bool) -> bool {
        bit
    }

    fn xor(&self, lhs: &bool, rhs: &bool) -> bool {
        lhs ^ rhs
    }

    fn and(&self, lhs: &bool, rhs: &bool) -> bool {
        lhs & rhs
    }

    fn not(&self, bit: &bool) -> bool {
        !bit
    }

    fn mux(&self, select: &bool, when_true: &bool, when_false: &bool) -> bool {
        if *select {
            *when_true
        } else {
            *when_false
        }
    }
}

pub fn generate_keys() -> (PlainClientKey, PlainContext) {
    (PlainClientKey, PlainContext)
}
