pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_accounts.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_accounts.sql")),
				"tables/002_ledger_entries.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_ledger_entries.sql")),
				"tables/003_search_fingerprints.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_search_fingerprints.sql")),
				"tables/004_enrichment_runs.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_enrichment_runs.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
