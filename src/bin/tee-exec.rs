//! tee-exec CLI
//!
//! Commands:
//!   tee-exec keygen [path]   create (or show) enclave key material
//!   tee-exec attest [path]   print an attestation quote for the enclave key
//!   tee-exec run [config]    run the executor against an in-process ledger
//!   tee-exec demo            deploy and call a program on an in-process ledger

use alloy_primitives::Address;
use log::info;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tee_exec::attestation::{self, AttestationPolicy};
use tee_exec::client;
use tee_exec::ledger::abi;
use tee_exec::{EnclaveKeys, Executor, ExecutorConfig, Ledger, MemoryLedger, ProgramConfig};

const KEY_FILE: &str = "enclave-keys.json";
const CONFIG_FILE: &str = "executor.json";
const BLOCK_INTERVAL: Duration = Duration::from_secs(12);

const DEMO_PROGRAM: &str = r#"
    ; a tiny ledger of balances
    (define balances (dict))

    (define (GetStates) (bytes (json-encode balances)))
    (define (SetStates s) (set! balances (json-decode s)))

    (define (Mint n)
      (set! balances (put balances caller (+ n (get balances caller 0))))
      (get balances caller))

    (define (Transfer to n)
      (let ((mine (get balances caller 0)))
        (if (< mine n)
            (error "insufficient balance")
            (begin
              (set! balances (put balances caller (- mine n)))
              (set! balances (put balances to (+ n (get balances to 0))))
              (dict "from" (get balances caller) "to" (get balances to))))))
"#;

fn print_usage() {
    println!(
        r#"
tee-exec: confidential program executor

Usage: tee-exec <command> [options]

Commands:
  keygen [path]   Create enclave key material (default: {KEY_FILE})
  attest [path]   Print an attestation quote for the enclave signing key
  run [config]    Run the executor from a config file (default: {CONFIG_FILE})
                  against an in-process ledger that mines every {BLOCK_SECS}s
  demo            Deploy and call a program on an in-process ledger

Set RUST_LOG=debug for per-event logs.
"#,
        BLOCK_SECS = BLOCK_INTERVAL.as_secs()
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "keygen" => cmd_keygen(&args[2..]),
        "attest" => cmd_attest(&args[2..]),
        "run" => cmd_run(&args[2..]).await,
        "demo" => cmd_demo().await,
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

fn key_path(args: &[String]) -> &str {
    args.first().map(|s| s.as_str()).unwrap_or(KEY_FILE)
}

fn cmd_keygen(args: &[String]) {
    let path = key_path(args);
    match EnclaveKeys::load_or_generate(path) {
        Ok(keys) => {
            println!("\n  Enclave keys ({})", path);
            println!("  {}", "=".repeat(40));
            println!("  Enclave address:  {}", keys.signer.address());
            println!("  Signing key:      0x{}", hex::encode(keys.signer.public_key()));
            println!("  Transaction key:  0x{}", hex::encode(keys.transaction.public_key()));
        }
        Err(e) => eprintln!("  Failed to load keys: {}", e),
    }
}

fn cmd_attest(args: &[String]) {
    let keys = match EnclaveKeys::load(key_path(args)) {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("  Failed to load keys: {} (run `tee-exec keygen` first)", e);
            return;
        }
    };
    let nonce = uuid::Uuid::new_v4().to_string();
    let quote = attestation::generate_quote(&keys.signer, &nonce);
    let verdict = attestation::verify_quote(&quote, &AttestationPolicy::default());
    match serde_json::to_string_pretty(&quote) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("  Failed to encode quote: {}", e),
    }
    println!("\n  Self-check: {:?}", verdict);
}

async fn cmd_run(args: &[String]) {
    let path = args.first().map(|s| s.as_str()).unwrap_or(CONFIG_FILE);
    if let Err(e) = run_executor(path).await {
        eprintln!("  Executor failed: {}", e);
    }
}

async fn run_executor(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = Arc::new(MemoryLedger::default());
    let mut executor = Executor::open(config_path, ledger.clone())?;
    if let Some(hash) = executor.register().await? {
        info!("Registration sent in {}", hash);
    }
    println!("  Enclave {} running from {}", executor.keys().signer.address(), config_path);
    println!("  Transaction key:  0x{}", hex::encode(executor.keys().transaction.public_key()));

    let (heads, notifications) = mpsc::channel(16);
    let worker = tokio::spawn(executor.run(notifications));
    let mut blocks = tokio::time::interval(BLOCK_INTERVAL);
    loop {
        tokio::select! {
            _ = blocks.tick() => {
                let head = ledger.mine().await;
                if heads.send(head.number).await.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping after the current round");
                break;
            }
        }
    }
    drop(heads);
    worker.await?;
    Ok(())
}

async fn cmd_demo() {
    if let Err(e) = run_demo().await {
        eprintln!("  Demo failed: {}", e);
    }
}

async fn run_demo() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n  tee-exec demo");
    println!("  {}", "=".repeat(40));

    let ledger = Arc::new(MemoryLedger::default());
    let keys = Arc::new(EnclaveKeys::generate());
    let config = ExecutorConfig {
        sender: Address::repeat_byte(0xE0),
        registry: Address::repeat_byte(0x11),
        ..Default::default()
    };
    let mut executor = Executor::from_config(&config, ledger.clone(), keys.clone(), None)?;
    executor.register().await?;
    println!("  Enclave {} registered", keys.signer.address());

    let enclave_key = keys.transaction.public_key();
    let alice = Address::repeat_byte(0xA1);
    let bob = Address::repeat_byte(0xB0);
    let mallory = Address::repeat_byte(0x66);

    // 1. Deploy, open to alice and bob only
    let acl = ProgramConfig {
        acl: vec![alice, bob],
        key_rotation: 2,
        history_key_discard: false,
    };
    let sealed = client::seal_deploy(&enclave_key, DEMO_PROGRAM.as_bytes(), &acl)?;
    let program = ledger
        .submit_deploy(alice, sealed.encrypted_code, sealed.encrypted_config, sealed.transaction_key)
        .await;
    let report = executor.run_round(ledger.mine().await.number).await?;
    println!("\n  [1] Deployed {} ({} output)", program, report.outputs);

    // 2. Calls: two authorised, one denied
    let calls = [
        (alice, r#"{"function": "Mint", "args": [100]}"#.to_string()),
        (alice, format!(r#"{{"function": "Transfer", "args": ["{}", 30]}}"#, bob)),
        (mallory, r#"{"function": "Mint", "args": [1000000]}"#.to_string()),
    ];
    let mut result_keys = Vec::new();
    for (caller, input) in &calls {
        let sealed = client::seal_call(&enclave_key, input.as_bytes())?;
        ledger
            .submit_execution(
                *caller,
                program,
                sealed.encrypted_input,
                sealed.encrypted_result_key,
                sealed.transaction_key,
            )
            .await;
        result_keys.push(sealed.result_key);
    }
    let report = executor.run_round(ledger.mine().await.number).await?;
    println!("  [2] Executed {} call(s) -> {} output(s)", report.events, report.outputs);

    // 3. Read the submitted batch back as a caller would
    let transactions = ledger.transactions().await;
    let last = transactions.last().ok_or("no transaction submitted")?;
    let outputs = abi::submitted_outputs(&last.input)?;
    for (((caller, input), key), output) in calls.iter().zip(&result_keys).zip(&outputs) {
        let shown = if output.is_error() {
            format!("error: {}", String::from_utf8_lossy(&output.result))
        } else {
            String::from_utf8_lossy(&client::open_result(key, &output.result)?).into_owned()
        };
        println!("      {} {} -> {}", caller, input, shown);
    }

    println!(
        "\n  Registry processed up to block {}",
        ledger.latest_processed_block().await?
    );
    Ok(())
}
