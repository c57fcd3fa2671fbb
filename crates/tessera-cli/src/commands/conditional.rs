//! Conditional write demo.

use anyhow::{Context, Result};
use tessera_client::{Condition, KeyEcho, QueryError, Statement};
use tessera_types::Value;

use super::{Demo, load_config};
use crate::table::print_results;

/// Insert `id` twice with IF NOT EXISTS, then read it back.
pub fn run(project: &str, id: i64) -> Result<()> {
    let config = load_config(project)?;
    let demo = Demo::new(&config)?;
    let runtime = demo.pool.handle();

    let mut table = Vec::new();
    for name in ["first", "second"] {
        let insert = Statement::new("INSERT INTO users (id, name) VALUES (?, ?)")
            .bind(vec![Value::BigInt(id), name.into()])
            .with_condition(Condition::IfNotExists);

        let (outcome, current) = match runtime.block_on(demo.session.mutate(insert)) {
            Ok(_) => ("applied".to_string(), "-".to_string()),
            Err(QueryError::ConditionNotMet { kind, current }) => {
                let current = current
                    .as_deref()
                    .and_then(|row| row.get_by_name("name"))
                    .and_then(Value::as_text)
                    .unwrap_or("-")
                    .to_string();
                (format!("rejected: {kind}"), current)
            }
            Err(e) => return Err(e).context("Conditional insert failed"),
        };
        table.push(vec![name.to_string(), outcome, current]);
    }

    print_results(&["write", "outcome", "current name"], &table);

    let read = Statement::new("SELECT * FROM users WHERE id = ?")
        .bind(vec![Value::BigInt(id)])
        .expect_key(KeyEcho::new(vec!["id".into()], &[Value::BigInt(id)])?);
    let row = runtime
        .block_on(demo.session.read_one(read))
        .context("Read back failed")?;
    let stored = row
        .as_ref()
        .and_then(|row| row.get_by_name("name"))
        .and_then(Value::as_text)
        .unwrap_or("(missing)");
    println!("Stored name: {stored}");

    Ok(())
}
