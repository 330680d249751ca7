//! Browser control panel served at `/`.

/// Single-page control panel. Talks to the JSON routes only.
pub const PANEL_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>camdeck</title>
  <style>
    * { box-sizing: border-box; }
    body { font-family: system-ui, sans-serif; margin: 0; padding: 1rem; background: #111; color: #ddd; }
    h1 { font-size: 1.2rem; margin: 0 0 1rem; }
    .grid { display: grid; grid-template-columns: minmax(320px, 2fr) minmax(280px, 1fr); gap: 1rem; }
    @media (max-width: 800px) { .grid { grid-template-columns: 1fr; } }
    .card { background: #1b1b1b; border: 1px solid #333; border-radius: 6px; padding: 1rem; }
    .row { display: flex; gap: 0.5rem; flex-wrap: wrap; align-items: center; margin-bottom: 0.75rem; }
    button { background: #2a2a2a; color: #ddd; border: 1px solid #444; border-radius: 4px; padding: 0.4rem 0.9rem; cursor: pointer; }
    button:hover { background: #333; }
    input, textarea { background: #0d0d0d; color: #ddd; border: 1px solid #444; border-radius: 4px; padding: 0.4rem; }
    textarea { width: 100%; min-height: 14rem; font-family: ui-monospace, monospace; font-size: 0.85rem; }
    #frame { width: 100%; aspect-ratio: 4 / 3; background: #000; object-fit: contain; border-radius: 4px; }
    #state { font-weight: bold; }
    .state-running { color: #6c6; } .state-paused { color: #cc6; } .state-stopped { color: #c66; }
    pre { white-space: pre-wrap; word-break: break-word; font-size: 0.8rem; margin: 0; }
    #message { min-height: 1.2rem; font-size: 0.85rem; color: #e99; }
  </style>
</head>
<body>
  <h1>camdeck</h1>
  <div class="grid">
    <div class="card">
      <div class="row">
        <label>User <input id="user" placeholder="anonymous" size="14"></label>
        <button data-cmd="start">Start</button>
        <button data-cmd="pause">Pause</button>
        <button data-cmd="resume">Resume</button>
        <button data-cmd="stop">Stop</button>
        <span>State: <span id="state" class="state-stopped">stopped</span></span>
      </div>
      <div id="message"></div>
      <img id="frame" alt="camera frame">
    </div>
    <div class="card">
      <div class="row"><strong>Code analysis</strong><button id="analyze">Analyze</button></div>
      <textarea id="code" spellcheck="false" placeholder="Paste Python code here"></textarea>
      <pre id="report"></pre>
    </div>
  </div>
  <script>
    const $ = (id) => document.getElementById(id);
    let etag = null;
    let objectUrl = null;

    function headers(extra) {
      const h = Object.assign({}, extra || {});
      const user = $("user").value.trim();
      if (user) h["x-user-id"] = user;
      return h;
    }

    function showState(state) {
      const el = $("state");
      el.textContent = state;
      el.className = "state-" + state;
    }

    function showError(body, status) {
      if (!body || !body.error) { $("message").textContent = ""; return; }
      let text = body.error.replace(/_/g, " ");
      if (body.detail) text += ": " + body.detail;
      if (body.retry_after_secs) text += " (retry in " + body.retry_after_secs.toFixed(1) + "s)";
      $("message").textContent = status + " " + text;
    }

    async function command(cmd) {
      const resp = await fetch("/camera/" + cmd, { method: "POST", headers: headers() });
      const body = await resp.json();
      if (body.state_after) showState(body.state_after);
      showError(body, resp.status);
    }

    async function poll() {
      try {
        const h = headers();
        if (etag) h["If-None-Match"] = etag;
        const resp = await fetch("/camera/frame", { headers: h, cache: "no-store" });
        if (resp.status === 200) {
          etag = resp.headers.get("ETag");
          showState(resp.headers.get("X-Camera-State") || "running");
          const blob = await resp.blob();
          if (objectUrl) URL.revokeObjectURL(objectUrl);
          objectUrl = URL.createObjectURL(blob);
          $("frame").src = objectUrl;
        } else if (resp.status === 404) {
          const body = await resp.json();
          showState(body.state);
          if (body.error) showError(body, resp.status);
        }
      } catch (e) {
        $("message").textContent = "connection lost";
      }
    }

    document.querySelectorAll("button[data-cmd]").forEach((b) =>
      b.addEventListener("click", () => command(b.dataset.cmd)));

    $("analyze").addEventListener("click", async () => {
      const resp = await fetch("/analyze", {
        method: "POST",
        headers: headers({ "content-type": "application/json" }),
        body: JSON.stringify({ code: $("code").value }),
      });
      const body = await resp.json();
      $("report").textContent = JSON.stringify(body, null, 2);
    });

    setInterval(poll, 1000);
    poll();
  </script>
</body>
</html>
"##;
