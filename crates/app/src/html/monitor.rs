pub const MONITOR_INDEX_HTML: &str = r#"
<!doctype html>
<html lang="en">

<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Handguard Safety Monitor</title>
  <style>
    :root {
      --bg: #050B16;
      --panel: #0A1628;
      --panel-light: #13233D;
      --text: #e2e8f0;
      --muted: #94a3b8;
      --safe: #4ade80;
      --caution: #facc15;
      --danger: #fb7185;
      --accent: #38bdf8;
    }

    * { box-sizing: border-box; }

    body {
      margin: 0;
      min-height: 100vh;
      background: var(--bg);
      color: var(--text);
      font-family: ui-sans-serif, system-ui, sans-serif;
    }

    header {
      display: flex;
      justify-content: space-between;
      align-items: center;
      padding: 1rem 1.5rem;
      background: var(--panel);
      border-bottom: 1px solid var(--panel-light);
    }

    header h1 { margin: 0; font-size: 1.25rem; letter-spacing: 0.08em; text-transform: uppercase; }

    #link { font-size: 0.85rem; color: var(--muted); }
    #link.live { color: var(--safe); }

    main {
      display: grid;
      grid-template-columns: repeat(auto-fit, minmax(18rem, 1fr));
      gap: 1rem;
      padding: 1.5rem;
    }

    .card {
      background: var(--panel);
      border: 1px solid var(--panel-light);
      border-radius: 0.75rem;
      padding: 1rem 1.25rem;
    }

    .card h2 {
      margin: 0 0 0.75rem;
      font-size: 0.8rem;
      color: var(--muted);
      text-transform: uppercase;
      letter-spacing: 0.1em;
    }

    #state {
      font-size: 3rem;
      font-weight: 700;
      letter-spacing: 0.1em;
      text-align: center;
      padding: 1.5rem 0;
      border-radius: 0.5rem;
      transition: background 0.2s;
    }

    #state.SAFE { background: rgba(74, 222, 128, 0.15); color: var(--safe); }
    #state.CAUTION { background: rgba(250, 204, 21, 0.15); color: var(--caution); }
    #state.DANGER { background: rgba(251, 113, 133, 0.2); color: var(--danger); }

    dl { display: grid; grid-template-columns: auto 1fr; gap: 0.4rem 1rem; margin: 0; }
    dt { color: var(--muted); }
    dd { margin: 0; text-align: right; font-variant-numeric: tabular-nums; }

    .bar { height: 0.6rem; background: var(--panel-light); border-radius: 999px; overflow: hidden; margin-top: 0.75rem; }
    .bar > div { height: 100%; width: 0; background: var(--accent); transition: width 0.2s; }

    #log { grid-column: 1 / -1; }
    #log ol { list-style: none; margin: 0; padding: 0; max-height: 20rem; overflow-y: auto; font-family: ui-monospace, monospace; font-size: 0.85rem; }
    #log li { padding: 0.2rem 0; border-bottom: 1px solid var(--panel-light); }
    #log .danger, #log .error { color: var(--danger); }
    #log .warning { color: var(--caution); }
    #log .resume { color: var(--safe); }
    #log .command { color: var(--accent); }
  </style>
</head>

<body>
  <header>
    <h1>Handguard Safety Monitor</h1>
    <span id="link">connecting…</span>
  </header>

  <main>
    <section class="card">
      <h2>Safety state</h2>
      <div id="state" class="SAFE">SAFE</div>
    </section>

    <section class="card">
      <h2>Hand</h2>
      <dl>
        <dt>Detected</dt><dd id="hand">no</dd>
        <dt>Distance</dt><dd id="distance">–</dd>
        <dt>In workspace</dt><dd id="zone">no</dd>
        <dt>Slowdown</dt><dd id="slowdown">off</dd>
      </dl>
    </section>

    <section class="card">
      <h2>Robot</h2>
      <dl>
        <dt>Paused</dt><dd id="paused">no</dd>
        <dt>Progress</dt><dd id="progress">0.0%</dd>
      </dl>
      <div class="bar"><div id="progress-bar"></div></div>
    </section>

    <section class="card">
      <h2>Calibration &amp; markers</h2>
      <dl>
        <dt>Calibrated</dt><dd id="calibrated">no</dd>
        <dt>Resolution</dt><dd id="resolution">–</dd>
        <dt>Focal (fx / fy)</dt><dd id="focal">–</dd>
        <dt>Marker id</dt><dd id="marker-id">–</dd>
        <dt>Markers seen</dt><dd id="markers">0 / 4</dd>
        <dt>Zone</dt><dd id="zone-defined">undefined</dd>
        <dt>Updated</dt><dd id="timestamp">–</dd>
      </dl>
    </section>

    <section class="card" id="log">
      <h2>Event log</h2>
      <ol id="entries"></ol>
    </section>
  </main>

  <script>
    const $ = (id) => document.getElementById(id);
    const yesNo = (v) => (v ? "yes" : "no");

    function render(s) {
      const state = $("state");
      state.textContent = s.status;
      state.className = s.status;
      $("hand").textContent = yesNo(s.hand_detected);
      $("distance").textContent =
        s.hand_distance_cm === null ? "–" : `${s.hand_distance_cm.toFixed(1)} cm`;
      $("zone").textContent = yesNo(s.in_workspace);
      $("slowdown").textContent = s.is_slowdown ? "active" : "off";
      $("paused").textContent = yesNo(s.robot_paused);
      $("progress").textContent = `${s.progress.toFixed(1)}%`;
      $("progress-bar").style.width = `${Math.min(100, Math.max(0, s.progress))}%`;
      $("calibrated").textContent = yesNo(s.calibration.is_calibrated);
      $("resolution").textContent = s.calibration.resolution;
      $("focal").textContent =
        s.calibration.fx === null ? "–" : `${s.calibration.fx} / ${s.calibration.fy}`;
      $("marker-id").textContent = s.aruco_marker_id;
      $("markers").textContent = `${s.aruco_detected} / 4`;
      $("zone-defined").textContent = s.workspace_defined ? "defined" : "undefined";
      $("timestamp").textContent = s.timestamp;
    }

    function connect() {
      const source = new EventSource("/api/stream");
      source.onopen = () => {
        $("link").textContent = "live";
        $("link").className = "live";
      };
      source.onmessage = (event) => render(JSON.parse(event.data));
      source.onerror = () => {
        $("link").textContent = "reconnecting…";
        $("link").className = "";
      };
    }

    async function refreshLog() {
      try {
        const response = await fetch("/api/logs");
        if (!response.ok) return;
        const entries = await response.json();
        const list = $("entries");
        list.replaceChildren(
          ...entries.reverse().map((entry) => {
            const item = document.createElement("li");
            item.className = entry.type;
            item.textContent = `${entry.time}  [${entry.type.toUpperCase()}]  ${entry.message}`;
            return item;
          })
        );
      } catch (_) {
        // Server gone; the stream handler shows the link state.
      }
    }

    connect();
    refreshLog();
    setInterval(refreshLog, 1000);
  </script>
</body>

</html>
"#;
