pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>edge-vision</title>
<style>
  body { font-family: sans-serif; margin: 1.5em; background: #111; color: #eee; }
  img { max-width: 100%; border: 1px solid #444; }
  button { margin-right: 0.5em; }
  #result { font-size: 1.3em; margin: 0.8em 0; }
  table { border-collapse: collapse; margin-top: 0.5em; }
  td, th { border: 1px solid #444; padding: 0.2em 0.6em; }
</style>
</head>
<body>
<h1>edge-vision</h1>
<img src="/video_feed" alt="camera feed">
<div>
  <button onclick="post('/start')">Start</button>
  <button onclick="post('/stop')">Stop</button>
  <label>Confidence
    <input id="confidence" type="range" min="0" max="1" step="0.05" value="0.5"
           oninput="setConfidence(this.value)">
  </label>
  <span id="confidence-value">0.50</span>
</div>
<div id="result">Not classifying</div>
<table id="detections">
  <thead><tr><th>class</th><th>score</th><th>box</th></tr></thead>
  <tbody></tbody>
</table>
<h2>Dataset</h2>
<div>
  <input id="label" placeholder="label">
  <button onclick="capture()">Capture</button>
  <span id="capture-status"></span>
</div>
<pre id="counts"></pre>
<button onclick="post('/close')">Close</button>
<script>
function post(url, body) {
  return fetch(url, {
    method: 'POST',
    headers: { 'Content-Type': 'application/x-www-form-urlencoded' },
    body: body || ''
  });
}
function setConfidence(value) {
  document.getElementById('confidence-value').textContent = Number(value).toFixed(2);
  post('/update_confidence', 'confidence=' + encodeURIComponent(value));
}
function capture() {
  const label = document.getElementById('label').value;
  post('/capture_image', 'label=' + encodeURIComponent(label))
    .then(r => r.ok ? r.json().then(j => 'saved ' + j.path) : r.text())
    .then(t => { document.getElementById('capture-status').textContent = t; refreshCounts(); });
}
function refreshCounts() {
  fetch('/capture_counts').then(r => r.json())
    .then(c => { document.getElementById('counts').textContent = JSON.stringify(c, null, 2); });
}
function refresh() {
  fetch('/get_classification').then(r => r.json()).then(c => {
    document.getElementById('result').textContent =
      c.label + ' (' + (c.probability * 100).toFixed(1) + '%)';
  });
  fetch('/get_detections').then(r => r.json()).then(ds => {
    const rows = ds.map(d => '<tr><td>' + d.class + '</td><td>' + d.score.toFixed(2) +
      '</td><td>' + (d.box ? d.box.map(v => v.toFixed(0)).join(', ') : '') + '</td></tr>');
    document.querySelector('#detections tbody').innerHTML = rows.join('');
  });
}
setInterval(refresh, 1000);
refreshCounts();
</script>
</body>
</html>
"#;
