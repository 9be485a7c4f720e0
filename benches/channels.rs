use criterion::{criterion_group, criterion_main, Criterion};
use tee_exec::crypto::{hash, transaction, EnclaveSigner, SymmetricKey, TransactionKeypair};

fn bench_channels(c: &mut Criterion) {
    let state = vec![7u8; 4096];

    let key = SymmetricKey::generate();
    c.bench_function("symmetric_encrypt_4k", |b| b.iter(|| key.encrypt(&state).unwrap()));

    let sealed = key.encrypt(&state).unwrap();
    c.bench_function("symmetric_decrypt_4k", |b| b.iter(|| key.decrypt(&sealed).unwrap()));

    let enclave = TransactionKeypair::generate();
    let public = enclave.public_key();
    c.bench_function("transaction_seal_4k", |b| {
        b.iter(|| transaction::seal(&public, &state).unwrap())
    });

    let payload = transaction::seal(&public, &state).unwrap();
    c.bench_function("transaction_open_4k", |b| {
        b.iter(|| enclave.decrypt(&payload, &public).unwrap())
    });

    c.bench_function("keccak_4k", |b| b.iter(|| hash(&state)));

    let signer = EnclaveSigner::generate();
    let digest = hash(b"output batch");
    c.bench_function("sign_digest", |b| b.iter(|| signer.sign_digest(&digest).unwrap()));
}

criterion_group!(benches, bench_channels);
criterion_main!(benches);
