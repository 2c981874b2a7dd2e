//! Complete Themis API Demo
//!
//! Demonstrates the core engine operations end to end against the bundled
//! in-memory store:
//! - Entity CRUD (put / delete)
//! - Index lifecycle (equality, range, fulltext)
//! - AQL queries (FILTER, ORDER BY, LIMIT, COLLECT)

use themis_engine::core::types::{Entity, Value};
use themis_engine::engine::Themis;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n=== Themis Engine - API Demo ===\n");

    println!("Opening in-memory store...");
    let db = Themis::in_memory()?;
    println!("Done!\n");

    println!("Step 1: Register indexes...");
    db.create_equality_index("articles", "category", false)?;
    db.create_range_index("articles", "views")?;
    db.create_fulltext_index("articles", "body", None)?;
    println!("  equality(category), range(views), fulltext(body)\n");

    println!("Step 2: INSERT - adding entities...");
    db.put("articles", &article("a1", "rust", "Rust Programming", "Learn the Rust language from scratch", 120))?;
    db.put("articles", &article("a2", "databases", "Database Systems", "SQL and NoSQL databases compared", 340))?;
    db.put("articles", &article("a3", "web", "Web Development", "Building web apps with modern frameworks", 75))?;
    db.put("articles", &article("a4", "rust", "Async Rust", "Concurrency and async runtimes in Rust", 210))?;
    println!("  inserted 4 articles\n");

    println!("Step 3: QUERY - equality filter...");
    let rows = db.query("FOR a IN articles FILTER a.category == \"rust\" RETURN a")?;
    println!("  category == \"rust\": {} results", rows.len());
    for row in &rows {
        println!("    - {}", row["title"]);
    }
    println!();

    println!("Step 4: QUERY - range + sort + limit...");
    let rows = db.query("FOR a IN articles FILTER a.views > 100 SORT a.views DESC LIMIT 2 RETURN a")?;
    println!("  views > 100, top 2 by views:");
    for row in &rows {
        println!("    - {} ({} views)", row["title"], row["views"]);
    }
    println!();

    println!("Step 5: QUERY - fulltext search...");
    let rows = db.query("FOR a IN articles FILTER FULLTEXT(a.body, \"rust\") RETURN a")?;
    println!("  FULLTEXT(body, \"rust\"): {} results\n", rows.len());

    println!("Step 6: QUERY - COLLECT aggregation...");
    let rows = db.query(
        "FOR a IN articles COLLECT category = a.category AGGREGATE total = SUM(a.views), n = COUNT(a) RETURN {category: category, total: total, n: n}",
    )?;
    for row in &rows {
        println!("  {} -> total_views={} articles={}", row["category"], row["total"], row["n"]);
    }
    println!();

    println!("Step 7: UPDATE - delete then re-insert...");
    db.delete("articles", "a3")?;
    db.put("articles", &article("a3", "web", "Advanced Web Development", "Deep dive into browser internals", 90))?;
    println!("  updated article a3\n");

    println!("Step 8: DELETE...");
    db.delete("articles", "a1")?;
    let rows = db.query("FOR a IN articles RETURN a")?;
    println!("  remaining articles: {}\n", rows.len());

    println!("=== Demo complete ===\n");
    Ok(())
}

fn article(pk: &str, category: &str, title: &str, body: &str, views: i64) -> Entity {
    Entity::new("articles", pk)
        .with_field("category", Value::Str(category.to_string()))
        .with_field("title", Value::Str(title.to_string()))
        .with_field("body", Value::Str(body.to_string()))
        .with_field("views", Value::I64(views))
}
