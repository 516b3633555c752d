// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![no_main]

use libfuzzer_sys::fuzz_target;

use tquic_ackrtt::SackList;
use tquic_ackrtt::SackOutcome;

// The first byte of input is the range capacity. Each 4 bytes after the first
// chunk hold a 16-bit packet number and a range length.
fuzz_target!(|data: &[u8]| {
    let capacity = data.first().map_or(1, |c| (*c as usize).max(1));
    let mut list = SackList::new(capacity);

    for chunk in data.chunks_exact(4).skip(1) {
        let pn_min = u16::from_be_bytes([chunk[0], chunk[1]]) as u64;
        let len = (u16::from_be_bytes([chunk[2], chunk[3]]) % 64) as u64;
        let pn_max = pn_min + len;

        let known = (pn_min..=pn_max).all(|pn| list.contains(pn));
        assert_eq!(list.would_fill_hole(pn_min, pn_max), !known);
        match list.update(pn_min, pn_max) {
            Ok(SackOutcome::Duplicate) => assert!(known),
            Ok(SackOutcome::Recorded) => {
                assert!(!known);
                assert!((pn_min..=pn_max).all(|pn| list.contains(pn)));
            }
            Err(_) => assert_eq!(list.len(), capacity),
        }

        assert!(list.len() <= capacity);
        let ranges: Vec<_> = list.iter().collect();
        for w in ranges.windows(2) {
            assert!(w[0].start > w[1].end + 1);
        }
    }
});
