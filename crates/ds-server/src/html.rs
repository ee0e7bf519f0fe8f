//! The HTML shell answering `format=html`.
//!
//! A single page that boots DuckDB-Wasm over the manifest payload and
//! previews the base artifact. The server ships paths and values only; all
//! rendering happens in the browser.

use ds_runtime::Manifest;

/// Wrap a manifest in the preview shell.
pub fn render_shell(manifest: &Manifest) -> String {
    let payload = serde_json::to_string(manifest)
        .unwrap_or_else(|_| "{}".to_string())
        // prevent </script> break-out
        .replace("</", "<\\/");
    let title = escape(&manifest.report);

    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>ducksearch report: {title}</title>
    <style>
      body {{ font-family: sans-serif; margin: 2rem; color: #222; }}
      code {{ background: #f5f5f5; padding: 0.1rem 0.3rem; border-radius: 4px; }}
      .section {{ margin-bottom: 1.75rem; }}
      table {{ border-collapse: collapse; min-width: 400px; }}
      th, td {{ border: 1px solid #ccc; padding: 0.25rem 0.5rem; text-align: left; }}
      th {{ background: #f0f0f0; }}
      #status {{ margin-bottom: 0.5rem; font-weight: 600; }}
    </style>
  </head>
  <body>
    <h1>ducksearch preview</h1>
    <div class="section">
      <p><strong>Report:</strong> <code>{title}</code></p>
      <p><strong>Base Parquet:</strong> <a id="base-link" href="/{base}">/{base}</a></p>
    </div>
    <div class="section">
      <div id="status">Loading DuckDB-Wasm...</div>
      <div style="overflow: auto"><table id="preview"></table></div>
    </div>

    <script type="application/json" id="report-payload">{payload}</script>
    <script type="module">
      import * as duckdb from "https://cdn.jsdelivr.net/npm/@duckdb/duckdb-wasm@1.30.0/+esm";

      const payload = JSON.parse(document.getElementById("report-payload").textContent);
      const statusEl = document.getElementById("status");
      const tableEl = document.getElementById("preview");
      const baseUrl = new URL(payload.base_parquet, window.location.origin).toString();

      async function boot() {{
        const bundle = await duckdb.selectBundle(duckdb.getJsDelivrBundles());
        const workerUrl = URL.createObjectURL(
          new Blob([`importScripts("${{bundle.mainWorker}}");`], {{ type: "text/javascript" }})
        );
        const db = new duckdb.AsyncDuckDB(new duckdb.ConsoleLogger(), new Worker(workerUrl));
        await db.instantiate(bundle.mainModule, bundle.pthreadWorker);
        const conn = await db.connect();
        statusEl.textContent = "Querying preview slice...";
        const safe = baseUrl.replaceAll("'", "''");
        const result = await conn.query(`select * from read_parquet('${{safe}}') limit 200`);
        render(result.toArray());
        statusEl.textContent = "Showing up to 200 rows from base_parquet";
      }}

      function render(rows) {{
        if (!rows.length) {{
          tableEl.innerHTML = "<tr><td><em>No rows returned</em></td></tr>";
          return;
        }}
        const headers = Object.keys(rows[0]);
        tableEl.innerHTML = "";
        const head = tableEl.insertRow();
        headers.forEach((h) => {{
          const th = document.createElement("th");
          th.textContent = h;
          head.appendChild(th);
        }});
        rows.forEach((row) => {{
          const tr = tableEl.insertRow();
          headers.forEach((h) => {{
            tr.insertCell().textContent = row[h];
          }});
        }});
      }}

      boot().catch((err) => {{
        statusEl.textContent = "Preview failed: " + err;
      }});
    </script>
  </body>
</html>
"#,
        title = title,
        base = escape(&manifest.base_parquet),
        payload = payload,
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
