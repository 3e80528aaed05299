use istanbul_bft::types::{
    block::{committed_seal_digest, Header, HeaderVote, IstanbulExtra, ISTANBUL_DIGEST},
    crypto_primitives::{keccak256, Keypair, SigningKey},
    data_types::Address,
};
use rand_core::OsRng;

/// Generate `n` signing keys, sorted by the address each one signs with. Sorting them makes the
/// index of a key equal to the position of its address in the validator set.
pub(crate) fn signing_keys(n: usize) -> Vec<SigningKey> {
    let mut keys: Vec<SigningKey> = (0..n).map(|_| SigningKey::random(&mut OsRng)).collect();
    keys.sort_by_key(address);
    keys
}

pub(crate) fn address(key: &SigningKey) -> Address {
    Keypair::new(key.clone()).address()
}

/// A genesis header listing the addresses of `keys` as the initial validator set.
pub(crate) fn genesis(keys: &[SigningKey]) -> Header {
    Header::genesis(keys.iter().map(address).collect(), 0)
}

/// Attach a proposer seal made with `key` to `header`.
pub(crate) fn seal(key: &SigningKey, mut header: Header) -> Header {
    let seal = Keypair::new(key.clone())
        .sign(&header.seal_hash())
        .unwrap();
    header.extra.proposer_seal = Some(seal);
    header
}

/// An unsealed header on top of `parent`, carrying `vote` and no data.
pub(crate) fn child(parent: &Header, vote: Option<HeaderVote>) -> Header {
    Header {
        parent_hash: parent.hash(),
        number: parent.number + 1,
        timestamp: parent.timestamp + 1,
        mix_digest: ISTANBUL_DIGEST,
        data_hash: keccak256(&[]),
        vote,
        extra: IstanbulExtra::default(),
    }
}

/// Attach committed seals made with `keys` to `header`.
pub(crate) fn commit(keys: &[SigningKey], mut header: Header) -> Header {
    let digest = committed_seal_digest(&header.hash());
    header.extra.committed_seals = keys
        .iter()
        .map(|key| Keypair::new(key.clone()).sign(&digest).unwrap())
        .collect();
    header
}
