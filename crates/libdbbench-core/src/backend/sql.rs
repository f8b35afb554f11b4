//! SQL text shared by the relational backends

use crate::workload::{builtin_suite, BenchMode, Benchmark, Template};

/// Schema (or database) every relational backend creates its tables in
pub const SCHEMA: &str = "dbbench";

const RELATIONAL_ONE: &str = "relational_one";
const RELATIONAL_TWO: &str = "relational_two";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Cockroach,
    Mysql,
}

impl Dialect {
    /// Physical name of logical table `table`
    pub fn qualify(&self, table: &str) -> String {
        match self {
            Dialect::Sqlite => format!("{}_{}", SCHEMA, table),
            _ => format!("{}.{}", SCHEMA, table),
        }
    }

    /// Bind placeholder for 1-based parameter `n`
    fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres | Dialect::Cockroach => format!("${}", n),
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Statements creating the schema, the CRUD table and the relational pair
    pub fn setup_statements(&self, table: &str) -> Vec<String> {
        let mut stmts = Vec::new();
        match self {
            Dialect::Postgres => stmts.push(format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA)),
            Dialect::Cockroach | Dialect::Mysql => {
                stmts.push(format!("CREATE DATABASE IF NOT EXISTS {}", SCHEMA))
            }
            Dialect::Sqlite => {}
        }

        let one = self.qualify(RELATIONAL_ONE);
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (id BIGINT PRIMARY KEY, balance BIGINT)",
            self.qualify(table)
        ));
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (oid BIGINT PRIMARY KEY, balance_one BIGINT)",
            one
        ));
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (balance_two BIGINT, relation BIGINT PRIMARY KEY, \
             FOREIGN KEY (relation) REFERENCES {} (oid))",
            self.qualify(RELATIONAL_TWO),
            one
        ));
        stmts
    }

    /// Statements dropping what `setup_statements` created. Dependent
    /// tables go first.
    pub fn cleanup_statements(&self, table: &str) -> Vec<String> {
        let mut stmts = vec![
            format!("DROP TABLE IF EXISTS {}", self.qualify(table)),
            format!("DROP TABLE IF EXISTS {}", self.qualify(RELATIONAL_TWO)),
            format!("DROP TABLE IF EXISTS {}", self.qualify(RELATIONAL_ONE)),
        ];
        match self {
            Dialect::Postgres => stmts.push(format!("DROP SCHEMA IF EXISTS {}", SCHEMA)),
            Dialect::Cockroach => stmts.push(format!("DROP DATABASE IF EXISTS {}", SCHEMA)),
            // The database may hold tables that are not ours
            Dialect::Mysql | Dialect::Sqlite => {}
        }
        stmts
    }

    /// Insert/delete benchmarks over two tables linked by a foreign key
    pub fn relational_benchmarks(&self) -> Vec<Benchmark> {
        let one = self.qualify(RELATIONAL_ONE);
        let two = self.qualify(RELATIONAL_TWO);
        let statements = [
            (
                "relation_insert0",
                format!(
                    "INSERT INTO {} (oid, balance_one) VALUES ({{{{.Iter}}}}, {{{{call .RandInt63}}}});",
                    one
                ),
            ),
            (
                "relation_insert1",
                format!(
                    "INSERT INTO {} (relation, balance_two) VALUES ({{{{.Iter}}}}, {{{{call .RandInt63}}}});",
                    two
                ),
            ),
            (
                "relation_select",
                format!(
                    "SELECT * FROM {two} INNER JOIN {one} ON {one}.oid = {two}.relation WHERE relation = {{{{.Iter}}}};",
                    one = one,
                    two = two
                ),
            ),
            (
                "relation_delete1",
                format!("DELETE FROM {} WHERE relation = {{{{.Iter}}}};", two),
            ),
            (
                "relation_delete0",
                format!("DELETE FROM {} WHERE oid = {{{{.Iter}}}};", one),
            ),
        ];

        statements
            .into_iter()
            .filter_map(|(name, sql)| match Template::parse(&sql) {
                Ok(template) => Some(Benchmark::statement(name, BenchMode::Loop, template)),
                Err(e) => {
                    tracing::error!(benchmark = name, error = %e, "Invalid built-in template");
                    None
                }
            })
            .collect()
    }

    /// The built-in CRUD suite followed by the relational benchmarks
    pub fn builtin_benchmarks(&self) -> Vec<Benchmark> {
        let mut benchmarks = builtin_suite();
        benchmarks.extend(self.relational_benchmarks());
        benchmarks
    }
}

/// Parameterised CRUD statements for one table.
///
/// Insert binds `(key, payload)`, update binds `(payload, key)`, select and
/// delete bind `(key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudSql {
    pub insert: String,
    pub select: String,
    pub update: String,
    pub delete: String,
}

impl CrudSql {
    pub fn new(dialect: Dialect, table: &str) -> Self {
        let t = dialect.qualify(table);
        let p1 = dialect.placeholder(1);
        let p2 = dialect.placeholder(2);

        Self {
            insert: format!("INSERT INTO {} (id, balance) VALUES ({}, {})", t, p1, p2),
            select: format!("SELECT id, balance FROM {} WHERE id = {}", t, p1),
            update: format!("UPDATE {} SET balance = {} WHERE id = {}", t, p1, p2),
            delete: format!("DELETE FROM {} WHERE id = {}", t, p1),
        }
    }
}
