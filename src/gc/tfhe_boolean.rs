//! Circuit evaluation over `tfhe` boolean ciphertexts. The client encrypts the bits of its
//! masked share, the server evaluates every gate with the server key and enters its own mask bits
//! as trivial ciphertexts. Only the client can decrypt, and it only ever sees output masked bits.

use crate::gc::{ClientKeyT, ContextT};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tfhe::boolean;
use tfhe::boolean::server_key::BinaryBooleanGates;

pub type BitCt = boolean::ciphertext::Ciphertext;

#[derive(Clone)]
pub struct FheContext {
    server_key: Arc<boolean::server_key::ServerKey>,
}

impl Debug for FheContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FheContext").finish()
    }
}

impl ContextT for FheContext {
    type Bit = BitCt;

    fn trivial(&self, bit: bool) -> BitCt {
        self.server_key.trivial_encrypt(bit)
    }

    fn xor(&self, lhs: &BitCt, rhs: &BitCt) -> BitCt {
        self.server_key.xor(lhs, rhs)
    }

    fn and(&self, lhs: &BitCt, rhs: &BitCt) -> BitCt {
        self.server_key.and(lhs, rhs)
    }

    fn not(&self, bit: &BitCt) -> BitCt {
        self.server_key.not(bit)
    }

    fn mux(&self, select: &BitCt, when_true: &BitCt, when_false: &BitCt) -> BitCt {
        self.server_key.mux(select, when_true, when_false)
    }
}

pub struct ClientKey {
    client_key: boolean::client_key::ClientKey,
}

impl Debug for ClientKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKey").finish()
    }
}

impl ClientKeyT for ClientKey {
    type Bit = BitCt;

    fn encrypt(&self, bit: bool) -> BitCt {
        self.client_key.encrypt(bit)
    }

    fn decrypt(&self, bit: &BitCt) -> bool {
        self.client_key.decrypt(bit)
    }
}

pub fn generate_keys() -> (ClientKey, FheContext) {
    let (client_key, server_key) = boolean::gen_keys();
    (
        ClientKey { client_key },
        FheContext {
            server_key: Arc::new(server_key),
        },
    )
}
